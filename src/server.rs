/// Modbus RTU slave
///
/// The slave is polled by the host application. Each call to
/// [`RtuSlave::poll`] checks the line without blocking; when a complete frame
/// is waiting it is validated, dispatched against the register bank and
/// answered. Nothing is buffered between calls.
///
/// Supported functions: read holding registers (0x03), write single register
/// (0x06) and write multiple registers (0x10). Everything else is answered
/// with an illegal-function exception.

use log::{debug, info, warn};

use crate::checksum;
use crate::config::SerialConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{encode_exception, ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, BROADCAST_ID};
use crate::register_bank::RegisterBank;
use crate::transport::{FrameState, LineTiming, RtuLink, SerialChannel, SerialPortChannel};
use crate::utils::validation;
use crate::{PROTOCOL_MAX_READ_REGISTERS, PROTOCOL_MAX_WRITE_REGISTERS};

/// Status code of a poll that consumed a frame without replying
pub const NO_REPLY: i32 = -1;

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No request for this unit was waiting
    Idle,
    /// A frame was consumed but the protocol defines no answer
    /// (corrupted frame, broadcast)
    NoReply,
    /// The request was rejected with this exception
    Exception(ModbusException),
    /// A normal reply of this many bytes was sent
    Replied(usize),
}

impl PollOutcome {
    /// Classic integer convention: 0 idle, -1 no reply, exception code 1-4,
    /// or the reply length
    pub fn status_code(&self) -> i32 {
        match self {
            PollOutcome::Idle => 0,
            PollOutcome::NoReply => NO_REPLY,
            PollOutcome::Exception(exception) => i32::from(exception.to_u8()),
            PollOutcome::Replied(count) => i32::try_from(*count).unwrap_or(i32::MAX),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Requests addressed to this unit or broadcast
    pub requests: u64,
    pub replies: u64,
    pub exceptions: u64,
    /// Frames dropped for a bad checksum or length
    pub dropped_frames: u64,
    /// Valid frames addressed to other units
    pub foreign_frames: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Modbus RTU slave over one serial channel
pub struct RtuSlave<C> {
    unit_id: SlaveId,
    link: RtuLink<C>,
    stats: ServerStats,
}

impl RtuSlave<SerialPortChannel> {
    /// Open the configured serial device and answer as `unit_id`
    pub fn open(unit_id: SlaveId, config: &SerialConfig) -> ModbusResult<Self> {
        let channel = SerialPortChannel::open(config)?;
        Self::new(unit_id, channel, config.line_timing())
    }
}

impl<C: SerialChannel> RtuSlave<C> {
    /// Create a slave answering as `unit_id` (1-247)
    pub fn new(unit_id: SlaveId, channel: C, timing: LineTiming) -> ModbusResult<Self> {
        validation::validate_slave_id(unit_id)?;
        info!("RTU slave {} ready", unit_id);
        Ok(Self {
            unit_id,
            link: RtuLink::new(channel, timing),
            stats: ServerStats::default(),
        })
    }

    pub fn unit_id(&self) -> SlaveId {
        self.unit_id
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn link(&self) -> &RtuLink<C> {
        &self.link
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.link.set_packet_logging(enabled);
    }

    /// Check for one request and handle it
    ///
    /// Returns immediately with [`PollOutcome::Idle`] when the line is quiet.
    /// Only channel failures are errors; everything a master can cause is an
    /// outcome.
    pub async fn poll(&mut self, bank: &mut RegisterBank) -> ModbusResult<PollOutcome> {
        match self.link.poll_frame().await? {
            FrameState::Empty => Ok(PollOutcome::Idle),
            FrameState::Complete(frame) => self.handle_frame(&frame, bank).await,
        }
    }

    async fn handle_frame(&mut self, frame: &[u8], bank: &mut RegisterBank) -> ModbusResult<PollOutcome> {
        self.stats.bytes_received += frame.len() as u64;

        if let Err(e) = checksum::check_crc(frame) {
            debug!("Dropping frame: {}", e);
            self.stats.dropped_frames += 1;
            if matches!(e, ModbusError::CrcMismatch { .. }) {
                self.link.record_crc_error();
            }
            return Ok(PollOutcome::NoReply);
        }

        let unit_id = frame[0];
        if unit_id != self.unit_id && unit_id != BROADCAST_ID {
            self.stats.foreign_frames += 1;
            return Ok(PollOutcome::Idle);
        }
        self.stats.requests += 1;

        if unit_id == BROADCAST_ID {
            let is_read = ModbusFunction::from_u8(frame[1]).map_or(false, |f| f.is_read_function());
            if !is_read {
                if let Err(exception) = process_request(frame, bank) {
                    debug!("Broadcast request rejected: {}", exception);
                }
            }
            return Ok(PollOutcome::NoReply);
        }

        match process_request(frame, bank) {
            Ok(reply) => {
                self.send(&reply).await?;
                self.stats.replies += 1;
                Ok(PollOutcome::Replied(reply.len()))
            }
            Err(exception) => {
                warn!("Slave {} rejects function 0x{:02X}: {}", self.unit_id, frame[1], exception);
                self.send(&encode_exception(unit_id, frame[1], exception)).await?;
                self.stats.exceptions += 1;
                Ok(PollOutcome::Exception(exception))
            }
        }
    }

    async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
        self.link.send_frame(frame).await?;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }
}

/// Execute one checksum-valid request frame against the bank
///
/// Returns the complete reply frame, or the exception to answer with.
pub fn process_request(frame: &[u8], bank: &mut RegisterBank) -> Result<Vec<u8>, ModbusException> {
    // the function is judged before its body
    if !frame.get(1).copied().map_or(false, is_served_function) {
        return Err(ModbusException::IllegalFunction);
    }

    let request = ModbusRequest::from_frame(frame).map_err(|e| match e {
        ModbusError::InvalidFunction { .. } => ModbusException::IllegalFunction,
        _ => ModbusException::IllegalDataValue,
    })?;

    debug!(
        "Processing request: Function={}, Unit={}, Address={}, Quantity={}",
        request.function, request.slave_id, request.address, request.quantity
    );

    match request.function {
        ModbusFunction::ReadHoldingRegisters => {
            check_count(request.quantity, PROTOCOL_MAX_READ_REGISTERS)?;
            let values = bank
                .read(request.address, request.quantity)
                .map_err(|_| ModbusException::IllegalDataAddress)?;
            Ok(ModbusResponse::registers(request.slave_id, request.function, values).encode())
        }

        ModbusFunction::WriteSingleRegister => {
            bank.set(request.address, request.single_value())
                .map_err(|_| ModbusException::IllegalDataAddress)?;
            Ok(frame.to_vec())
        }

        ModbusFunction::WriteMultipleRegisters => {
            check_count(request.quantity, PROTOCOL_MAX_WRITE_REGISTERS)?;
            bank.write(request.address, &request.register_values())
                .map_err(|_| ModbusException::IllegalDataAddress)?;
            Ok(ModbusResponse::write_ack(&request).encode())
        }

        _ => Err(ModbusException::IllegalFunction),
    }
}

/// Function codes this slave answers: 0x03, 0x06 and 0x10
pub fn is_served_function(code: u8) -> bool {
    matches!(
        ModbusFunction::from_u8(code),
        Ok(ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::WriteMultipleRegisters)
    )
}

fn check_count(count: u16, max: u16) -> Result<(), ModbusException> {
    if count == 0 || count > max {
        return Err(ModbusException::IllegalDataValue);
    }
    Ok(())
}
