//! # Modbus RTU Error Handling
//!
//! One error type is shared by the master transaction engine, the slave
//! request handler and the serial transport.
//!
//! ## Error Categories
//!
//! ### Line Errors
//! - **Io**: the serial channel failed while writing or reading, or more than
//!   a frame's worth of bytes arrived without a pause
//! - **Connection**: the device could not be opened or configured
//! - **Timeout**: no response byte arrived within the first-byte wait
//!
//! ### Integrity Errors
//! - **CrcMismatch**: the trailing checksum does not match the frame
//! - **Frame**: the frame is too short or its byte count is inconsistent
//!
//! ### Request Errors
//! - **Exception**: the slave rejected the request with an exception code
//! - **InvalidFunction / InvalidAddress / InvalidData**: requests the codec or
//!   the register bank cannot serve
//!
//! ## Legacy Status Codes
//!
//! Every outcome can still be collapsed into the single integer returned by
//! classic RTU master libraries:
//!
//! ```rust
//! use modbus_rtu::{ModbusError, ModbusResult};
//! use modbus_rtu::error::status_of;
//!
//! let ok: ModbusResult<usize> = Ok(7);
//! assert_eq!(status_of(&ok), 7);
//!
//! let silent: ModbusResult<usize> = Err(ModbusError::timeout("waiting for response", 1000));
//! assert_eq!(status_of(&silent), 0);
//!
//! let rejected: ModbusResult<usize> = Err(ModbusError::exception(0x03, 0x02));
//! assert_eq!(status_of(&rejected), -2);
//! ```

use thiserror::Error;

use crate::protocol::ModbusException;

/// Status for "no valid response": timeout, checksum or framing failure
pub const COMMS_FAILURE: i32 = 0;

/// Status for a failure of the serial channel itself
pub const PORT_FAILURE: i32 = -11;

pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised on either side of an RTU line
///
/// Line conditions (timeouts, corrupted frames) are kept apart from requests
/// the slave will never accept, so callers can decide what to retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Serial channel failure
    ///
    /// # Examples
    /// - Write to the device failed
    /// - The far end of the channel was closed
    /// - More than 256 bytes arrived without a silent interval
    #[error("serial I/O failure: {message}")]
    Io { message: String },

    #[error("cannot open serial device: {message}")]
    Connection { message: String },

    /// Nothing arrived within the wait
    #[error("no response within {timeout_ms} ms ({operation})")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol rule broken in a way no narrower variant covers
    ///
    /// # Examples
    /// - Reply from a different unit than the one addressed
    /// - Channel used against its transmit-enable direction
    #[error("protocol violation: {message}")]
    Protocol { message: String },

    #[error("unsupported function code 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Register range outside the bank
    #[error("registers {start}..+{count} outside the register bank")]
    InvalidAddress { start: u16, count: u16 },

    #[error("invalid request data: {message}")]
    InvalidData { message: String },

    /// Both values are in wire order, first transmitted byte in the high half
    #[error("checksum mismatch: computed {expected:04X}, received {actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Exception reply from the slave, codes 0x01 to 0x08
    #[error("slave rejected function 0x{function:02X} with exception 0x{code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Malformed frame: too short or with an inconsistent byte count
    #[error("malformed frame: {message}")]
    Frame { message: String },

    #[error("invalid configuration: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Timeout while `operation` was waiting `timeout_ms` milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Exception reply to `function`; the message names the standard code
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match ModbusException::from_u8(code) {
            Some(exception) => exception.name().to_string(),
            None => format!("Unknown Exception 0x{:02X}", code),
        };
        Self::Exception { function, code, message }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Exception code carried by an exception reply, if this is one
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            Self::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether sending the same request again may succeed
    ///
    /// Line conditions are retryable. Of the exceptions only Acknowledge and
    /// Slave Device Busy are; the others will come back unchanged.
    ///
    /// ```rust
    /// use modbus_rtu::ModbusError;
    ///
    /// assert!(ModbusError::crc_mismatch(0xC40B, 0xC40A).is_recoverable());
    /// assert!(ModbusError::exception(0x06, 0x06).is_recoverable());
    /// assert!(!ModbusError::exception(0x06, 0x02).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Timeout { .. } | Self::CrcMismatch { .. } | Self::Frame { .. } => true,
            Self::Exception { code, .. } => matches!(
                ModbusException::from_u8(*code),
                Some(ModbusException::Acknowledge | ModbusException::SlaveDeviceBusy)
            ),
            _ => false,
        }
    }

    /// Whether the serial line or device is at fault
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Whether a frame was received but not acceptable
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
                | Self::CrcMismatch { .. }
        )
    }

    /// Collapse the error into the classic integer return convention
    ///
    /// - `0` when no valid response was obtained (timeout, CRC, framing)
    /// - `-code` for a slave exception
    /// - [`PORT_FAILURE`] when the channel itself failed
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Exception { code, .. } => -i32::from(*code),
            Self::Io { .. } | Self::Connection { .. } => PORT_FAILURE,
            _ => COMMS_FAILURE,
        }
    }
}

/// Collapse a transaction result into the classic integer return convention
///
/// Successful calls report their byte count. A broadcast write succeeds with
/// `Ok(0)` and therefore collapses to [`COMMS_FAILURE`] like a timeout does;
/// callers that broadcast should inspect the `Result` itself.
pub fn status_of(result: &ModbusResult<usize>) -> i32 {
    match result {
        Ok(count) => i32::try_from(*count).unwrap_or(i32::MAX),
        Err(error) => error.status_code(),
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// tokio does not report the elapsed time; callers that know the bound
/// build the timeout themselves
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("elapsed", 0)
    }
}

impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::io(format!("serial driver: {}", err))
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let silent = ModbusError::timeout("waiting for response", 1000);
        assert!(silent.is_recoverable());
        assert!(silent.is_transport_error());
        assert!(!silent.is_protocol_error());

        let rejected = ModbusError::exception(0x03, 0x02);
        assert!(!rejected.is_recoverable());
        assert!(rejected.is_protocol_error());
        assert_eq!(rejected.exception_code(), Some(0x02));

        assert!(!ModbusError::configuration("empty device").is_recoverable());
        assert!(ModbusError::connection("busy").is_transport_error());
    }

    #[test]
    fn test_messages() {
        let corrupted = ModbusError::crc_mismatch(0xC40B, 0x1234).to_string();
        assert!(corrupted.contains("C40B"));
        assert!(corrupted.contains("1234"));

        assert!(ModbusError::exception(0x10, 0x07).to_string().contains("Negative Acknowledge"));
        assert!(ModbusError::exception(0x10, 0x2A).to_string().contains("Unknown Exception 0x2A"));
        assert_eq!(
            ModbusError::timeout("waiting for response", 250).to_string(),
            "no response within 250 ms (waiting for response)"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ModbusError::timeout("response", 1000).status_code(), COMMS_FAILURE);
        assert_eq!(ModbusError::crc_mismatch(1, 2).status_code(), COMMS_FAILURE);
        assert_eq!(ModbusError::frame("short").status_code(), COMMS_FAILURE);
        assert_eq!(ModbusError::io("closed").status_code(), PORT_FAILURE);
        for code in 1..=8u8 {
            assert_eq!(ModbusError::exception(0x03, code).status_code(), -(code as i32));
        }

        assert_eq!(status_of(&Ok(9)), 9);
        assert_eq!(status_of(&Err(ModbusError::exception(0x06, 0x04))), -4);

        // broadcast success and "no valid response" share the same integer
        let broadcast: ModbusResult<usize> = Ok(0);
        let silent: ModbusResult<usize> = Err(ModbusError::timeout("response", 1000));
        assert_eq!(status_of(&broadcast), COMMS_FAILURE);
        assert_eq!(status_of(&broadcast), status_of(&silent));
        assert!(broadcast.is_ok() && silent.is_err());
    }
}
