/// Modbus RTU master
///
/// The master runs one transaction at a time: encode the request, send it with
/// the transmitter asserted, wait a bounded time for the reply, then validate
/// and decode it. No retries are made; retry policy belongs to the caller.
///
/// Every family operation returns `ModbusResult<usize>`. `Ok(n)` carries the
/// length of the reply frame without its checksum; failures keep their cause
/// (`Timeout`, `CrcMismatch`, `Exception`, `Io`, ...). Callers that need the
/// classic single-integer convention use [`crate::error::status_of`].

use async_trait::async_trait;
use log::{debug, warn};

use crate::config::SerialConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusAddress, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, BROADCAST_ID};
use crate::transport::{LineTiming, RtuLink, SerialChannel, SerialPortChannel, TransportStats};
use crate::utils::OperationTimer;
use crate::{MAX_READ_COILS, MAX_READ_REGISTERS};

/// Master-side operations, one per function code
///
/// Addresses are 1-based. Read counts above the per-family maximum are
/// clamped before sending; so are write lists.
///
/// `Ok(n)` is the reply length without the two CRC bytes: 6 for every write
/// confirmation, 3 plus the byte count for reads. Unlike older C masters,
/// writes and bit reads do not count the CRC. A broadcast write (unit 0)
/// returns `Ok(0)`, which [`crate::error::status_of`] cannot tell apart from
/// a failed transaction; match on the `Result` instead.
#[async_trait]
pub trait ModbusMaster: Send {
    /// Read coils (function code 0x01)
    ///
    /// `dest` is cleared to `false` and then filled with up to `count` decoded
    /// coils.
    async fn read_coils(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [bool]) -> ModbusResult<usize>;

    /// Read discrete inputs (function code 0x02)
    async fn read_discrete_inputs(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [bool]) -> ModbusResult<usize>;

    /// Read holding registers (function code 0x03)
    ///
    /// Up to `dest.len()` registers are stored; the rest of `dest` is untouched.
    async fn read_holding_registers(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [u16]) -> ModbusResult<usize>;

    /// Read input registers (function code 0x04)
    async fn read_input_registers(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [u16]) -> ModbusResult<usize>;

    /// Write single coil (function code 0x05)
    async fn write_single_coil(&mut self, slave_id: SlaveId, address: ModbusAddress, on: bool) -> ModbusResult<usize>;

    /// Write single register (function code 0x06)
    async fn write_single_register(&mut self, slave_id: SlaveId, address: ModbusAddress, value: u16) -> ModbusResult<usize>;

    /// Write multiple coils (function code 0x0F)
    async fn write_multiple_coils(&mut self, slave_id: SlaveId, address: ModbusAddress, values: &[bool]) -> ModbusResult<usize>;

    /// Write multiple registers (function code 0x10)
    async fn write_multiple_registers(&mut self, slave_id: SlaveId, address: ModbusAddress, values: &[u16]) -> ModbusResult<usize>;
}

/// Modbus RTU master over one serial channel
pub struct RtuMaster<C> {
    link: RtuLink<C>,
    logger: Option<CallbackLogger>,
}

impl RtuMaster<SerialPortChannel> {
    /// Open the configured serial device
    pub fn open(config: &SerialConfig) -> ModbusResult<Self> {
        let channel = SerialPortChannel::open(config)?;
        Ok(Self::new(channel, config.line_timing()))
    }
}

impl<C: SerialChannel> RtuMaster<C> {
    /// Create a master on any channel
    pub fn new(channel: C, timing: LineTiming) -> Self {
        Self::from_link(RtuLink::new(channel, timing))
    }

    /// Create a master on an existing link
    pub fn from_link(link: RtuLink<C>) -> Self {
        Self { link, logger: None }
    }

    /// Attach a transaction logger
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Enable or disable hex dumps of every frame
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.link.set_packet_logging(enabled);
    }

    pub fn link(&self) -> &RtuLink<C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut RtuLink<C> {
        &mut self.link
    }

    pub fn stats(&self) -> &TransportStats {
        self.link.stats()
    }

    /// Run one raw transaction
    ///
    /// Broadcast writes are sent without waiting for a reply and yield an
    /// empty response; broadcast reads are refused.
    ///
    /// # Errors
    ///
    /// - `Timeout` when no reply starts within the response timeout
    /// - `CrcMismatch` / `Frame` for corrupted or malformed replies
    /// - `Protocol` when another unit answered
    /// - `Exception` when the slave rejected the request
    /// - `Io` when the channel failed
    pub async fn execute_request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        if request.slave_id == BROADCAST_ID && request.function.is_read_function() {
            return Err(ModbusError::invalid_data(format!(
                "{} cannot be broadcast", request.function.name()
            )));
        }

        if let Some(logger) = &self.logger {
            logger.log_request(request);
        }

        let timer = OperationTimer::start(request.function.name());
        let result = self.transact(request).await;
        timer.stop();

        match &result {
            Ok(response) => {
                if let Some(logger) = &self.logger {
                    logger.log_response(response);
                }
            }
            Err(e) => {
                debug!("Slave {} {} failed: {}", request.slave_id, request.function, e);
                if let Some(logger) = &self.logger {
                    logger.error(&format!("Slave {} {}: {}", request.slave_id, request.function, e));
                }
            }
        }

        result?.into_result()
    }

    async fn transact(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.link.send_frame(&request.encode()).await?;

        if request.slave_id == BROADCAST_ID {
            return Ok(ModbusResponse::new_success(BROADCAST_ID, request.function, Vec::new()));
        }

        let frame = self.link.receive_frame().await?;
        match ModbusResponse::from_frame(&frame, request) {
            Ok(response) => Ok(response),
            Err(e @ ModbusError::CrcMismatch { .. }) => {
                warn!("Discarding reply from slave {}: {}", request.slave_id, e);
                self.link.record_crc_error();
                Err(e)
            }
            Err(e) => {
                warn!("Invalid reply from slave {}: {}", request.slave_id, e);
                self.link.record_error();
                Err(e)
            }
        }
    }

    async fn read_bits(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: ModbusAddress,
        count: u16,
        dest: &mut [bool],
    ) -> ModbusResult<usize> {
        let count = count.min(MAX_READ_COILS);
        let request = ModbusRequest::new_read(slave_id, function, address, count);
        let response = self.execute_request(&request).await?;

        let bits = response.parse_bits()?;
        dest.fill(false);
        for (slot, bit) in dest.iter_mut().zip(bits.into_iter().take(count as usize)) {
            *slot = bit;
        }
        Ok(response.received_len())
    }

    async fn read_registers(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: ModbusAddress,
        count: u16,
        dest: &mut [u16],
    ) -> ModbusResult<usize> {
        let count = count.min(MAX_READ_REGISTERS);
        let request = ModbusRequest::new_read(slave_id, function, address, count);
        let response = self.execute_request(&request).await?;

        let registers = response.parse_registers()?;
        for (slot, value) in dest.iter_mut().zip(registers) {
            *slot = value;
        }
        Ok(response.received_len())
    }

    async fn write(&mut self, request: ModbusRequest) -> ModbusResult<usize> {
        let response = self.execute_request(&request).await?;
        if request.slave_id == BROADCAST_ID {
            return Ok(0);
        }
        Ok(response.received_len())
    }
}

#[async_trait]
impl<C: SerialChannel> ModbusMaster for RtuMaster<C> {
    async fn read_coils(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [bool]) -> ModbusResult<usize> {
        self.read_bits(ModbusFunction::ReadCoils, slave_id, address, count, dest).await
    }

    async fn read_discrete_inputs(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [bool]) -> ModbusResult<usize> {
        self.read_bits(ModbusFunction::ReadDiscreteInputs, slave_id, address, count, dest).await
    }

    async fn read_holding_registers(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [u16]) -> ModbusResult<usize> {
        self.read_registers(ModbusFunction::ReadHoldingRegisters, slave_id, address, count, dest).await
    }

    async fn read_input_registers(&mut self, slave_id: SlaveId, address: ModbusAddress, count: u16, dest: &mut [u16]) -> ModbusResult<usize> {
        self.read_registers(ModbusFunction::ReadInputRegisters, slave_id, address, count, dest).await
    }

    async fn write_single_coil(&mut self, slave_id: SlaveId, address: ModbusAddress, on: bool) -> ModbusResult<usize> {
        self.write(ModbusRequest::write_single_coil(slave_id, address, on)).await
    }

    async fn write_single_register(&mut self, slave_id: SlaveId, address: ModbusAddress, value: u16) -> ModbusResult<usize> {
        self.write(ModbusRequest::write_single_register(slave_id, address, value)).await
    }

    async fn write_multiple_coils(&mut self, slave_id: SlaveId, address: ModbusAddress, values: &[bool]) -> ModbusResult<usize> {
        self.write(ModbusRequest::write_multiple_coils(slave_id, address, values)).await
    }

    async fn write_multiple_registers(&mut self, slave_id: SlaveId, address: ModbusAddress, values: &[u16]) -> ModbusResult<usize> {
        self.write(ModbusRequest::write_multiple_registers(slave_id, address, values)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::error::status_of;
    use crate::protocol::{encode_exception, ModbusException};
    use crate::transport::StreamChannel;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    fn timing() -> LineTiming {
        LineTiming::for_baud_rate(115200).with_response_timeout(Duration::from_millis(200))
    }

    /// Fake slave answering each request with a scripted reply.
    /// Returns the request frames it saw.
    fn scripted_slave(
        channel: StreamChannel<DuplexStream>,
        replies: Vec<Vec<u8>>,
    ) -> JoinHandle<Vec<Vec<u8>>> {
        tokio::spawn(async move {
            let mut link = RtuLink::new(channel, timing().with_response_timeout(Duration::from_secs(2)));
            let mut seen = Vec::new();
            for reply in replies {
                seen.push(link.receive_frame().await.unwrap());
                link.send_frame(&reply).await.unwrap();
            }
            seen
        })
    }

    fn master_with(replies: Vec<Vec<u8>>) -> (RtuMaster<StreamChannel<DuplexStream>>, JoinHandle<Vec<Vec<u8>>>) {
        let (a, b) = StreamChannel::pair(1024);
        (RtuMaster::new(a, timing()), scripted_slave(b, replies))
    }

    #[tokio::test]
    async fn test_read_holding_registers() {
        let reply = ModbusResponse::registers(1, ModbusFunction::ReadHoldingRegisters, &[10, 20]).encode();
        let (mut master, slave) = master_with(vec![reply]);

        let mut dest = [0u16; 4];
        let received = master.read_holding_registers(1, 1, 2, &mut dest).await.unwrap();
        assert_eq!(received, 7);
        assert_eq!(dest, [10, 20, 0, 0]);

        let seen = slave.await.unwrap();
        assert_eq!(seen[0], vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[tokio::test]
    async fn test_read_count_is_clamped() {
        let values: Vec<u16> = (0..MAX_READ_REGISTERS).collect();
        let reply = ModbusResponse::registers(1, ModbusFunction::ReadInputRegisters, &values).encode();
        let (mut master, slave) = master_with(vec![reply]);

        let mut dest = vec![0u16; 150];
        master.read_input_registers(1, 1, 150, &mut dest).await.unwrap();
        assert_eq!(&dest[..100], values.as_slice());

        let seen = slave.await.unwrap();
        assert_eq!(&seen[0][4..6], &100u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_read_coils_pads_destination() {
        let mut reply = vec![0x01, 0x01, 0x01, 0b0000_0101];
        checksum::append_crc(&mut reply);
        let (mut master, _slave) = master_with(vec![reply]);

        let mut dest = [true; 8];
        master.read_coils(1, 1, 3, &mut dest).await.unwrap();
        assert_eq!(dest, [true, false, true, false, false, false, false, false]);
    }

    #[tokio::test]
    async fn test_exception_reply() {
        let reply = encode_exception(1, 0x06, ModbusException::IllegalDataAddress);
        let (mut master, _slave) = master_with(vec![reply]);

        let result = master.write_single_register(1, 9, 5).await;
        assert_eq!(result.as_ref().unwrap_err().exception_code(), Some(0x02));
        assert_eq!(status_of(&result), -2);
    }

    #[tokio::test]
    async fn test_corrupted_reply_is_no_response() {
        let mut reply = ModbusResponse::registers(1, ModbusFunction::ReadHoldingRegisters, &[1, 2]).encode();
        reply[3] ^= 0x01;
        let (mut master, _slave) = master_with(vec![reply]);

        let mut dest = [0u16; 2];
        let result = master.read_holding_registers(1, 1, 2, &mut dest).await;
        assert!(matches!(result, Err(ModbusError::CrcMismatch { .. })));
        assert_eq!(status_of(&result), 0);
        assert_eq!(dest, [0, 0]);
        assert_eq!(master.stats().crc_errors, 1);
    }

    #[tokio::test]
    async fn test_reply_from_another_unit() {
        let reply = ModbusResponse::registers(2, ModbusFunction::ReadHoldingRegisters, &[1]).encode();
        let (mut master, _slave) = master_with(vec![reply]);

        let mut dest = [0u16; 1];
        let result = master.read_holding_registers(1, 1, 1, &mut dest).await;
        assert!(matches!(result, Err(ModbusError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_no_reply_times_out() {
        let (a, _b) = StreamChannel::pair(1024);
        let mut master = RtuMaster::new(a, timing());

        let started = tokio::time::Instant::now();
        let result = master.write_single_coil(3, 1, true).await;
        assert!(matches!(result, Err(ModbusError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(status_of(&result), 0);
        assert_eq!(master.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_broadcast_write_does_not_wait() {
        let (a, _b) = StreamChannel::pair(1024);
        let mut master = RtuMaster::new(a, timing());

        let started = tokio::time::Instant::now();
        assert_eq!(master.write_multiple_registers(BROADCAST_ID, 1, &[1, 2]).await.unwrap(), 0);
        assert!(started.elapsed() < Duration::from_millis(200));

        let mut dest = [0u16; 1];
        assert!(matches!(
            master.read_holding_registers(BROADCAST_ID, 1, 1, &mut dest).await,
            Err(ModbusError::InvalidData { .. })
        ));
        assert_eq!(master.stats().frames_sent, 1);
    }
}
