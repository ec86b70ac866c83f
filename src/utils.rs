/// Small helpers shared by the master, the slave and the binaries

use std::time::{Duration, Instant};

use log::debug;

/// Measures one master transaction and logs its duration when stopped
pub struct OperationTimer {
    started: Instant,
    label: &'static str,
}

impl OperationTimer {
    pub fn start(label: &'static str) -> Self {
        Self { started: Instant::now(), label }
    }

    /// Elapsed time since `start`, logged at debug level
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        debug!("{} took {}", self.label, format::format_duration(elapsed));
        elapsed
    }
}

pub mod validation {
    use crate::error::{ModbusError, ModbusResult};
    use crate::protocol::SlaveId;

    /// Highest unit id a slave may answer to; 248-255 are reserved
    pub const MAX_UNIT_ID: SlaveId = 247;

    /// Accept unit ids a slave can be configured with (1-247)
    ///
    /// 0 is the broadcast address and never owned by a single slave.
    pub fn validate_slave_id(unit_id: SlaveId) -> ModbusResult<()> {
        if !(1..=MAX_UNIT_ID).contains(&unit_id) {
            return Err(ModbusError::invalid_data(format!(
                "unit id {} outside 1..={}", unit_id, MAX_UNIT_ID
            )));
        }
        Ok(())
    }
}

/// Text rendering for frames, registers and timings
pub mod format {
    use std::time::Duration;

    /// Frame bytes as `01 03 00 00`
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        let mut text = String::with_capacity(bytes.len() * 3);
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            text.push_str(&format!("{:02X}", byte));
        }
        text
    }

    /// Register values as `0002 00C8`
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|value| format!("{:04X}", value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// µs below a millisecond, ms with one decimal below a second, else s
    pub fn format_duration(duration: Duration) -> String {
        match duration.as_micros() {
            micros if micros < 1_000 => format!("{}µs", micros),
            micros if micros < 1_000_000 => format!("{:.1}ms", micros as f64 / 1_000.0),
            _ => format!("{:.2}s", duration.as_secs_f64()),
        }
    }
}

pub mod logging {
    /// Route `log` output through env_logger at debug level
    ///
    /// Later calls are no-ops.
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}
