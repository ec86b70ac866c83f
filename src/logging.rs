//! Application-level transaction logging for the master
//!
//! A [`CallbackLogger`] hands formatted lines to a closure supplied by the
//! application. Requests and responses can be shown as raw RTU frames, as
//! decoded fields, or both.

use std::sync::Arc;

use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, COIL_ON};
use crate::utils::format::bytes_to_hex;

/// Severity passed to the callback; lower is more severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Upper-case label used by the console logger
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// How frames are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Wire bytes, checksum included
    Raw,
    /// Function names, addresses and decoded values
    Interpreted,
    /// Interpreted at the message level, raw at debug level
    Both,
}

/// Callback receiving a level and a formatted line
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that forwards to an application callback
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Logger passing lines at `min_level` or more severe, frames decoded
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Logger with an explicit frame rendering
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Logger printing timestamped lines to stdout/stderr
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("[{}] {}: {}", timestamp, level.as_str(), message),
                LogLevel::Info | LogLevel::Debug => println!("[{}] {}: {}", timestamp, level.as_str(), message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Logger that drops everything
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    /// Forward one line when `level` passes the filter
    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.should_log(level) {
            return;
        }
        if let Some(callback) = &self.callback {
            callback(level, message);
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }

    /// Log an outgoing request
    pub fn log_request(&self, request: &ModbusRequest) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        let raw = || format!("Modbus Request -> Raw: {}", bytes_to_hex(&request.encode()));
        let interpreted = || {
            let mut line = format!(
                "Modbus Request -> Slave: {}, Function: {}, Address: {}, Quantity: {}",
                request.slave_id, request.function, request.address, request.quantity
            );
            if let Some(values) = interpret_request_values(request) {
                line.push_str(", ");
                line.push_str(&values);
            }
            line
        };

        self.emit(raw, interpreted);
    }

    /// Log a decoded response (exceptions included)
    pub fn log_response(&self, response: &ModbusResponse) {
        if let Some(error) = response.get_exception() {
            self.warn(&format!("Modbus Response <- Slave: {}, {}", response.slave_id, error));
            return;
        }

        if !self.should_log(LogLevel::Info) {
            return;
        }

        let raw = || format!("Modbus Response <- Raw: {}", bytes_to_hex(&response.encode()));
        let interpreted = || {
            format!(
                "Modbus Response <- Slave: {}, Function: {}, {}",
                response.slave_id,
                response.function,
                interpret_response_data(response)
            )
        };

        self.emit(raw, interpreted);
    }

    fn emit(&self, raw: impl Fn() -> String, interpreted: impl Fn() -> String) {
        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpreted()),
            LoggingMode::Both => {
                self.info(&interpreted());
                self.debug(&raw());
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

fn interpret_request_values(request: &ModbusRequest) -> Option<String> {
    match request.function {
        ModbusFunction::WriteSingleCoil => Some(format!(
            "Value: {}",
            if request.single_value() == COIL_ON { "ON" } else { "OFF" }
        )),
        ModbusFunction::WriteSingleRegister => Some(format!("Value: {}", request.single_value())),
        ModbusFunction::WriteMultipleCoils => Some(format!("Coils: {:?}", request.coil_values())),
        ModbusFunction::WriteMultipleRegisters => Some(format!("Registers: {:?}", request.register_values())),
        _ => None,
    }
}

fn interpret_response_data(response: &ModbusResponse) -> String {
    match response.function {
        ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => match response.parse_bits() {
            Ok(bits) => format!("Byte count: {}, Bits: {:?}", bits.len() / 8, &bits[..bits.len().min(16)]),
            Err(_) => format!("Data: {}", hex::encode(&response.data)),
        },
        ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
            match response.parse_registers() {
                Ok(registers) => format!(
                    "Byte count: {}, Registers: {:?}",
                    registers.len() * 2,
                    &registers[..registers.len().min(8)]
                ),
                Err(_) => format!("Data: {}", hex::encode(&response.data)),
            }
        }
        _ if response.data.len() >= 4 => {
            // write confirmations carry the wire address
            let address = u16::from_be_bytes([response.data[0], response.data[1]]).wrapping_add(1);
            let field = u16::from_be_bytes([response.data[2], response.data[3]]);
            match response.function {
                ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                    format!("Address: {}, Value: {} (0x{:04X})", address, field, field)
                }
                _ => format!("Address: {}, Quantity: {}", address, field),
            }
        }
        _ => format!("Data: {}", hex::encode(&response.data)),
    }
}

/// Timestamped console logger at info level
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Logger around an application callback, optionally with level and mode
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing(level: LogLevel, mode: LoggingMode) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: LogCallback = Box::new(move |level, message| {
            sink.lock().unwrap().push((level, message.to_string()));
        });
        (CallbackLogger::with_mode(Some(callback), level, mode), lines)
    }

    #[test]
    fn test_level_filtering() {
        let (logger, lines) = capturing(LogLevel::Warn, LoggingMode::Interpreted);
        logger.debug("hidden");
        logger.info("hidden");
        logger.warn("shown");
        logger.error("shown too");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (LogLevel::Warn, "shown".to_string()));
    }

    #[test]
    fn test_raw_request_is_the_wire_frame() {
        let (logger, lines) = capturing(LogLevel::Info, LoggingMode::Raw);
        logger.log_request(&ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 1, 2));

        let lines = lines.lock().unwrap();
        assert_eq!(lines[0].1, "Modbus Request -> Raw: 01 03 00 00 00 02 C4 0B");
    }

    #[test]
    fn test_interpreted_response() {
        let (logger, lines) = capturing(LogLevel::Debug, LoggingMode::Both);
        let response = ModbusResponse::registers(1, ModbusFunction::ReadHoldingRegisters, &[2, 200, 0]);
        logger.log_response(&response);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].1.contains("Registers: [2, 200, 0]"));
        assert_eq!(lines[1].0, LogLevel::Debug);
        assert!(lines[1].1.starts_with("Modbus Response <- Raw: 01 03 06"));
    }

    #[test]
    fn test_exception_response_is_a_warning() {
        let (logger, lines) = capturing(LogLevel::Info, LoggingMode::Interpreted);
        logger.log_response(&ModbusResponse::new_exception(1, ModbusFunction::WriteSingleRegister, 0x02));

        let lines = lines.lock().unwrap();
        assert_eq!(lines[0].0, LogLevel::Warn);
        assert!(lines[0].1.contains("Illegal Data Address"));
    }

    #[test]
    fn test_disabled_logger() {
        let logger = CallbackLogger::default();
        logger.error("nothing happens");
        logger.log_request(&ModbusRequest::write_single_register(1, 1, 5));
    }
}
