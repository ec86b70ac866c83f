/// Modbus RTU Master Demo
///
/// Drives a three-register LED blinker slave (see `slave_demo`):
///
/// | Address | Register |
/// |---------|----------|
/// | 1 | control: 0 off, 1 on, 2 blink |
/// | 2 | blink period in milliseconds |
/// | 3 | blink counter |
///
/// Usage: `master_demo [config.json]`

use std::time::Duration;

use log::{error, info};
use tokio::time::sleep;

use modbus_rtu::error::status_of;
use modbus_rtu::{console_logger, ModbusMaster, ModbusResult, Parity, RtuMaster, SerialConfig};

const SLAVE_ID: u8 = 1;
const CONTROL: u16 = 1;
const REGISTER_COUNT: u16 = 3;

fn load_config() -> ModbusResult<SerialConfig> {
    match std::env::args().nth(1) {
        Some(path) => SerialConfig::from_json_file(path),
        None => Ok(SerialConfig::new("/dev/ttyUSB0", 115200, Parity::Even)),
    }
}

fn report(operation: &str, result: &ModbusResult<usize>) {
    match result {
        Ok(count) => info!("{}: {} bytes received", operation, count),
        Err(e) => error!("{}: {} (status {})", operation, e, status_of(result)),
    }
}

async fn read_blink_count<M: ModbusMaster>(master: &mut M) {
    let mut registers = [0u16; REGISTER_COUNT as usize];
    let result = master.read_holding_registers(SLAVE_ID, CONTROL, REGISTER_COUNT, &mut registers).await;
    report("read registers", &result);
    if result.is_ok() {
        println!("\n The blink count at this time is {} \n", registers[2]);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("{}", modbus_rtu::info());

    let config = load_config()?;
    info!("Using {} @{} baud, parity {}", config.device, config.effective_baud_rate(), config.parity);

    let mut master = RtuMaster::open(&config)?.with_logger(console_logger!());

    // LED off, then on for two seconds
    report("led off", &master.write_single_register(SLAVE_ID, CONTROL, 0).await);
    sleep(Duration::from_secs(1)).await;
    report("led on", &master.write_single_register(SLAVE_ID, CONTROL, 1).await);
    sleep(Duration::from_secs(2)).await;

    // blink fast for two seconds
    report("blink 200ms", &master.write_multiple_registers(SLAVE_ID, CONTROL, &[2, 200]).await);
    sleep(Duration::from_secs(2)).await;
    read_blink_count(&mut master).await;
    sleep(Duration::from_secs(1)).await;

    // slower until the slave's watchdog gives up
    report("blink 500ms", &master.write_multiple_registers(SLAVE_ID, CONTROL, &[2, 500]).await);
    sleep(Duration::from_secs(1)).await;
    read_blink_count(&mut master).await;

    let stats = master.stats();
    info!(
        "Frames sent: {}, received: {}, timeouts: {}, CRC errors: {}",
        stats.frames_sent, stats.frames_received, stats.timeouts, stats.crc_errors
    );
    Ok(())
}
