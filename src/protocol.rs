/// Modbus RTU protocol definitions and frame codec
///
/// This module contains the function codes, exception codes and the
/// request/response structures, together with their translation to and from
/// RTU wire frames:
///
/// ```text
/// unit_id(1) | function(1) | payload(n) | crc_lo(1) | crc_hi(1)
/// ```
///
/// Addresses held in [`ModbusRequest`] are the 1-based addresses a master
/// application uses; the wire carries `address - 1`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum::{self, CHECKSUM_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::{MAX_WRITE_COILS, MAX_WRITE_REGISTERS};

/// Modbus address type (1-based on the master side)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Unit id addressing every slave on the line; never answered
pub const BROADCAST_ID: SlaveId = 0;

/// Wire value of a coil switched on
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of a coil switched off
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// unit id + function + address + count/value
const REQUEST_HEADER_SIZE: usize = 6;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Function for a raw code; unsupported codes are `InvalidFunction`
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Codes 0x01 to 0x04 read, everything else writes
    pub fn is_read_function(self) -> bool {
        self.to_u8() <= 0x04
    }

    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    /// Coils and discrete inputs travel bit-packed
    pub fn is_bit_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadDiscreteInputs | Self::WriteSingleCoil | Self::WriteMultipleCoils
        )
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Exception codes a slave answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::SlaveDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::SlaveDeviceBusy),
            0x07 => Some(ModbusException::NegativeAcknowledge),
            0x08 => Some(ModbusException::MemoryParityError),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short standard name
    pub fn name(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
            ModbusException::SlaveDeviceFailure => "Slave Device Failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::SlaveDeviceBusy => "Slave Device Busy",
            ModbusException::NegativeAcknowledge => "Negative Acknowledge",
            ModbusException::MemoryParityError => "Memory Parity Error",
        }
    }

    /// Long description from the Modbus application protocol
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code received in the query is not an allowable action for the slave",
            ModbusException::IllegalDataAddress => "The data address received in the query is not an allowable address for the slave",
            ModbusException::IllegalDataValue => "A value contained in the query data field is not an allowable value for the slave",
            ModbusException::SlaveDeviceFailure => "An unrecoverable error occurred while the slave was attempting to perform the requested action",
            ModbusException::Acknowledge => "The slave has accepted the request and is processing it, but a long duration of time will be required to do so",
            ModbusException::SlaveDeviceBusy => "The slave is engaged in processing a long-duration program command",
            ModbusException::NegativeAcknowledge => "The slave cannot perform the program function received in the query",
            ModbusException::MemoryParityError => "The slave attempted to read extended memory, but detected a parity error in the memory",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// One master request, independent of its wire form
///
/// `data` holds the function-specific payload without its byte-count prefix:
/// the two value bytes for single writes, the packed coils or big-endian
/// registers for multiple writes, nothing for reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a new read request
    pub fn new_read(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Create a write single coil request (0xFF00 = on, 0x0000 = off)
    pub fn write_single_coil(slave_id: SlaveId, address: ModbusAddress, on: bool) -> Self {
        let value = if on { COIL_ON } else { COIL_OFF };
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleCoil,
            address,
            quantity: 1,
            data: value.to_be_bytes().to_vec(),
        }
    }

    /// Create a write single register request
    pub fn write_single_register(slave_id: SlaveId, address: ModbusAddress, value: ModbusValue) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleRegister,
            address,
            quantity: 1,
            data: value.to_be_bytes().to_vec(),
        }
    }

    /// Create a write multiple coils request
    ///
    /// Coils beyond [`MAX_WRITE_COILS`] are dropped, not rejected.
    pub fn write_multiple_coils(slave_id: SlaveId, address: ModbusAddress, values: &[bool]) -> Self {
        let values = &values[..values.len().min(MAX_WRITE_COILS as usize)];
        Self {
            slave_id,
            function: ModbusFunction::WriteMultipleCoils,
            address,
            quantity: values.len() as u16,
            data: data_utils::pack_bits(values),
        }
    }

    /// Create a write multiple registers request
    ///
    /// Registers beyond [`MAX_WRITE_REGISTERS`] are dropped, not rejected.
    pub fn write_multiple_registers(slave_id: SlaveId, address: ModbusAddress, values: &[u16]) -> Self {
        let values = &values[..values.len().min(MAX_WRITE_REGISTERS as usize)];
        Self {
            slave_id,
            function: ModbusFunction::WriteMultipleRegisters,
            address,
            quantity: values.len() as u16,
            data: data_utils::registers_to_bytes(values),
        }
    }

    /// Address as carried on the wire (`address - 1`)
    ///
    /// Address 0 wraps to 0xFFFF, which no slave bank can hold.
    pub fn wire_address(&self) -> u16 {
        self.address.wrapping_sub(1)
    }

    /// Value of a single coil/register write
    pub fn single_value(&self) -> u16 {
        match self.data.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        }
    }

    /// Coil states of a write multiple coils request
    pub fn coil_values(&self) -> Vec<bool> {
        data_utils::unpack_bits(&self.data, self.quantity as usize)
    }

    /// Register values of a write multiple registers request
    pub fn register_values(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Payload byte count a well-formed reply to this read must carry
    pub fn expected_byte_count(&self) -> usize {
        if self.function.is_bit_function() {
            (self.quantity as usize + 7) / 8
        } else {
            self.quantity as usize * 2
        }
    }

    /// Encode the request as a complete RTU frame, checksum included
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + 1 + self.data.len() + CHECKSUM_SIZE);

        frame.push(self.slave_id);
        frame.push(self.function.to_u8());
        frame.extend_from_slice(&self.wire_address().to_be_bytes());

        match self.function {
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters => {
                frame.extend_from_slice(&self.quantity.to_be_bytes());
            },

            ModbusFunction::WriteSingleCoil |
            ModbusFunction::WriteSingleRegister => {
                frame.extend_from_slice(&self.single_value().to_be_bytes());
            },

            ModbusFunction::WriteMultipleCoils |
            ModbusFunction::WriteMultipleRegisters => {
                // Quantity (2 bytes) + Byte count (1 byte) + Data
                frame.extend_from_slice(&self.quantity.to_be_bytes());
                frame.push(self.data.len() as u8);
                frame.extend_from_slice(&self.data);
            },
        }

        checksum::append_crc(&mut frame);
        frame
    }

    /// Decode a request frame received by a slave
    ///
    /// # Errors
    ///
    /// - `CrcMismatch` / `Frame` when the frame fails the checksum or is too short
    /// - `InvalidFunction` for function codes outside the supported set
    /// - `Frame` when the length disagrees with the function's layout
    /// - `InvalidData` for coil values other than 0xFF00/0x0000 and byte counts
    ///   that disagree with the element count
    pub fn from_frame(frame: &[u8]) -> ModbusResult<Self> {
        checksum::check_crc(frame)?;
        let body = &frame[..frame.len() - CHECKSUM_SIZE];

        let slave_id = body[0];
        let function = ModbusFunction::from_u8(body[1])?;

        if body.len() < REQUEST_HEADER_SIZE {
            return Err(ModbusError::frame(format!(
                "{} request too short: {} bytes", function.name(), body.len()
            )));
        }

        let address = u16::from_be_bytes([body[2], body[3]]).wrapping_add(1);
        let field = u16::from_be_bytes([body[4], body[5]]);

        match function {
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters => {
                expect_len(function, body, REQUEST_HEADER_SIZE)?;
                Ok(Self::new_read(slave_id, function, address, field))
            },

            ModbusFunction::WriteSingleCoil => {
                expect_len(function, body, REQUEST_HEADER_SIZE)?;
                if field != COIL_ON && field != COIL_OFF {
                    return Err(ModbusError::invalid_data(format!(
                        "Coil value must be 0xFF00 or 0x0000, got 0x{:04X}", field
                    )));
                }
                Ok(Self::write_single_coil(slave_id, address, field == COIL_ON))
            },

            ModbusFunction::WriteSingleRegister => {
                expect_len(function, body, REQUEST_HEADER_SIZE)?;
                Ok(Self::write_single_register(slave_id, address, field))
            },

            ModbusFunction::WriteMultipleCoils |
            ModbusFunction::WriteMultipleRegisters => {
                if body.len() < REQUEST_HEADER_SIZE + 1 {
                    return Err(ModbusError::frame(format!("{} request without byte count", function.name())));
                }
                let byte_count = body[REQUEST_HEADER_SIZE] as usize;
                expect_len(function, body, REQUEST_HEADER_SIZE + 1 + byte_count)?;

                let request = Self {
                    slave_id,
                    function,
                    address,
                    quantity: field,
                    data: body[REQUEST_HEADER_SIZE + 1..].to_vec(),
                };
                if byte_count != request.expected_byte_count() {
                    return Err(ModbusError::invalid_data(format!(
                        "Byte count {} does not match quantity {}", byte_count, field
                    )));
                }
                Ok(request)
            },
        }
    }
}

fn expect_len(function: ModbusFunction, body: &[u8], expected: usize) -> ModbusResult<()> {
    if body.len() != expected {
        return Err(ModbusError::frame(format!(
            "{} frame has {} bytes before CRC, expected {}", function.name(), body.len(), expected
        )));
    }
    Ok(())
}

/// Encode an exception response frame
///
/// Takes the raw function byte so that unsupported function codes can be
/// answered too.
pub fn encode_exception(slave_id: SlaveId, function_code: u8, exception: ModbusException) -> Vec<u8> {
    let mut frame = vec![slave_id, function_code | EXCEPTION_FLAG, exception.to_u8()];
    checksum::append_crc(&mut frame);
    frame
}

/// One slave reply, independent of its wire form
///
/// `data` holds everything between the function byte and the checksum. For an
/// exception response it is empty and the code is kept in `exception`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    pub exception: Option<u8>,
}

impl ModbusResponse {
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception: None,
        }
    }

    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, exception_code: u8) -> Self {
        Self {
            slave_id,
            function,
            data: Vec::new(),
            exception: Some(exception_code),
        }
    }

    /// Create a register read reply (byte count followed by big-endian values)
    pub fn registers(slave_id: SlaveId, function: ModbusFunction, values: &[u16]) -> Self {
        let mut data = Vec::with_capacity(1 + values.len() * 2);
        data.push((values.len() * 2) as u8);
        data.extend_from_slice(&data_utils::registers_to_bytes(values));
        Self::new_success(slave_id, function, data)
    }

    /// Create a write multiple confirmation (start address and count of the request)
    pub fn write_ack(request: &ModbusRequest) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&request.wire_address().to_be_bytes());
        data.extend_from_slice(&request.quantity.to_be_bytes());
        Self::new_success(request.slave_id, request.function, data)
    }

    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Standard exception carried by this response, if the code is known
    pub fn exception_kind(&self) -> Option<ModbusException> {
        self.exception.and_then(ModbusException::from_u8)
    }

    /// The exception as an error, for replies that carry one
    pub fn get_exception(&self) -> Option<ModbusError> {
        self.exception.map(|code| ModbusError::exception(self.function.to_u8(), code))
    }

    /// Turn an exception response into its error
    pub fn into_result(self) -> ModbusResult<Self> {
        match self.get_exception() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    /// Length of the received frame without its checksum
    pub fn received_len(&self) -> usize {
        2 + self.data.len() + usize::from(self.exception.is_some())
    }

    /// Encode as a complete RTU frame, checksum included
    pub fn encode(&self) -> Vec<u8> {
        if let Some(code) = self.exception {
            let mut frame = vec![self.slave_id, self.function.to_u8() | EXCEPTION_FLAG, code];
            checksum::append_crc(&mut frame);
            return frame;
        }

        let mut frame = Vec::with_capacity(2 + self.data.len() + CHECKSUM_SIZE);
        frame.push(self.slave_id);
        frame.push(self.function.to_u8());
        frame.extend_from_slice(&self.data);
        checksum::append_crc(&mut frame);
        frame
    }

    /// Decode the reply to `request` received by a master
    ///
    /// A function byte different from the request's marks an exception; the
    /// byte after it is taken as the exception code.
    ///
    /// # Errors
    ///
    /// - `CrcMismatch` when the checksum does not match
    /// - `Protocol` when the reply comes from another unit
    /// - `Frame` when the length or byte count is inconsistent
    pub fn from_frame(frame: &[u8], request: &ModbusRequest) -> ModbusResult<Self> {
        checksum::check_crc(frame)?;
        let body = &frame[..frame.len() - CHECKSUM_SIZE];

        let slave_id = body[0];
        if slave_id != request.slave_id {
            return Err(ModbusError::protocol(format!(
                "reply from unit {} to a request for unit {}",
                slave_id, request.slave_id
            )));
        }

        if body[1] != request.function.to_u8() {
            if body.len() < 3 {
                return Err(ModbusError::frame("Exception response without exception code"));
            }
            return Ok(Self::new_exception(slave_id, request.function, body[2]));
        }

        if request.function.is_read_function() {
            if body.len() < 3 {
                return Err(ModbusError::frame("Read response without byte count"));
            }
            let byte_count = body[2] as usize;
            if body.len() != 3 + byte_count {
                return Err(ModbusError::frame(format!(
                    "Byte count {} does not match {} data bytes", byte_count, body.len() - 3
                )));
            }
            if byte_count != request.expected_byte_count() {
                return Err(ModbusError::frame(format!(
                    "Byte count {} does not match requested quantity {}", byte_count, request.quantity
                )));
            }
        } else if body.len() != REQUEST_HEADER_SIZE {
            return Err(ModbusError::frame(format!(
                "Write confirmation has {} bytes before CRC, expected {}", body.len(), REQUEST_HEADER_SIZE
            )));
        }

        Ok(Self::new_success(slave_id, request.function, body[2..].to_vec()))
    }

    /// Register values of a register read reply
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }

        let (byte_count, payload) = self.payload()?;
        if byte_count % 2 != 0 {
            return Err(ModbusError::frame(format!("odd register byte count {}", byte_count)));
        }

        data_utils::bytes_to_registers(payload)
    }

    /// Parse response data as bits (bool values), LSB of the first byte first
    pub fn parse_bits(&self) -> ModbusResult<Vec<bool>> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }

        let (byte_count, payload) = self.payload()?;
        Ok(data_utils::unpack_bits(payload, byte_count * 8))
    }

    fn payload(&self) -> ModbusResult<(usize, &[u8])> {
        let Some((&count, rest)) = self.data.split_first() else {
            return Err(ModbusError::frame("reply without byte count"));
        };

        let byte_count = count as usize;
        if rest.len() < byte_count {
            return Err(ModbusError::frame("Incomplete response data"));
        }
        Ok((byte_count, &rest[..byte_count]))
    }
}

/// Payload packing shared by requests and replies
pub mod data_utils {
    use super::*;

    /// Registers as consecutive big-endian pairs
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        registers.iter().flat_map(|value| value.to_be_bytes()).collect()
    }

    /// Big-endian pairs back to registers; an odd length is invalid data
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::invalid_data(format!(
                "{} register bytes cannot form whole registers", bytes.len()
            )));
        }

        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// One bit per coil, least-significant bit first
    ///
    /// Unused high bits of the last byte stay zero.
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        bits.chunks(8)
            .map(|octet| {
                octet
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (bit, &on)| if on { byte | 1 << bit } else { byte })
            })
            .collect()
    }

    /// First `bit_count` coils of a packed payload
    ///
    /// Positions past the end of `bytes` read as `false`.
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| {
                bytes
                    .get(i / 8)
                    .map_or(false, |byte| byte & (1 << (i % 8)) != 0)
            })
            .collect()
    }
}
