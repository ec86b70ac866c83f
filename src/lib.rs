//! # Modbus RTU - Master and Slave over Half-Duplex Serial Lines
//!
//! An async Modbus RTU implementation for RS-485/RS-232 networks: a master that
//! queries remote devices one transaction at a time, and a polled slave that
//! answers such queries from a local register bank.
//!
//! ## Features
//!
//! - **Frame codec**: every supported function code, CRC-16 (Modbus) included
//! - **Silence-based framing**: frame ends are detected from the baud-rate
//!   derived character interval, per channel
//! - **Direction control**: the transmitter is asserted only while a frame is
//!   being written
//! - **Tagged results**: timeouts, corrupted replies, exceptions and port
//!   failures stay distinguishable, with the classic integer convention
//!   available through [`error::status_of`]
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | |
//! | 0x02 | Read Discrete Inputs | ✅ | |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | |
//! | 0x05 | Write Single Coil | ✅ | |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! Function codes the slave does not serve are answered with an
//! illegal-function exception.
//!
//! ## Quick Start
//!
//! ### Master
//!
//! ```rust,no_run
//! use modbus_rtu::{ModbusMaster, ModbusResult, RtuMaster, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = SerialConfig::from_json_file("serial.json")?;
//!     let mut master = RtuMaster::open(&config)?;
//!
//!     master.write_single_register(1, 1, 0x1234).await?;
//!
//!     let mut values = [0u16; 10];
//!     master.read_holding_registers(1, 1, 10, &mut values).await?;
//!     println!("Read registers: {:?}", values);
//!     Ok(())
//! }
//! ```
//!
//! ### Slave
//!
//! ```rust,no_run
//! use modbus_rtu::{RegisterBank, RtuSlave, SerialConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bank = RegisterBank::new(16);
//!     let mut slave = RtuSlave::open(1, &SerialConfig::default())?;
//!
//!     loop {
//!         let outcome = slave.poll(&mut bank).await?;
//!         if outcome.status_code() == 0 {
//!             tokio::time::sleep(Duration::from_millis(5)).await;
//!         }
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Application   │    │   Application   │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │    RtuMaster    │    │    RtuSlave     │──► RegisterBank
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Protocol + CRC  │    │ Protocol + CRC  │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │     RtuLink     │◄──►│     RtuLink     │
//! │ (SerialChannel) │    │ (SerialChannel) │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// CRC-16 (Modbus) checksum
pub mod checksum;

/// Modbus protocol definitions and frame codec
pub mod protocol;

/// Serial line configuration
pub mod config;

/// Serial channels and the RTU frame link
pub mod transport;

/// Master transaction engine
pub mod client;

/// Polled slave request handler
pub mod server;

/// Register storage served by the slave
pub mod register_bank;

/// Utility functions
pub mod utils;

/// Callback logging for master transactions
pub mod logging;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
pub use config::{Parity, SerialConfig};
pub use transport::{FrameState, LineTiming, RtuLink, SerialChannel, SerialPortChannel, StreamChannel, TransportStats};
pub use client::{ModbusMaster, RtuMaster};
pub use server::{PollOutcome, RtuSlave, ServerStats};
pub use register_bank::RegisterBank;
pub use utils::OperationTimer;
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Coils / discrete inputs requested per master read
pub const MAX_READ_COILS: u16 = 2000;

/// Registers requested per master read
pub const MAX_READ_REGISTERS: u16 = 100;

/// Coils sent per master write
pub const MAX_WRITE_COILS: u16 = 800;

/// Registers sent per master write
pub const MAX_WRITE_REGISTERS: u16 = 100;

/// Registers a slave serves in one read (0x03)
pub const PROTOCOL_MAX_READ_REGISTERS: u16 = 125;

/// Registers a slave accepts in one write (0x10)
pub const PROTOCOL_MAX_WRITE_REGISTERS: u16 = 123;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus RTU v{} - master and slave for half-duplex serial lines", VERSION)
}
