//! Integration Tests for the Modbus RTU Library
//!
//! Master and slave run against each other over an in-memory duplex pipe,
//! with the slave polled from its own task the way a host application would.

use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use modbus_rtu::checksum;
use modbus_rtu::error::status_of;
use modbus_rtu::utils::logging::init_test_logger;
use modbus_rtu::*;

type Channel = StreamChannel<DuplexStream>;

fn fast_timing(response_timeout_ms: u64) -> LineTiming {
    LineTiming::for_baud_rate(115200).with_response_timeout(Duration::from_millis(response_timeout_ms))
}

/// Poll a slave until the master end of the pipe goes away, then hand back the bank
fn spawn_slave(unit_id: u8, channel: Channel, mut bank: RegisterBank) -> JoinHandle<(RegisterBank, ServerStats)> {
    tokio::spawn(async move {
        let mut slave = RtuSlave::new(unit_id, channel, fast_timing(100)).unwrap();
        loop {
            match slave.poll(&mut bank).await {
                Ok(PollOutcome::Idle) => sleep(Duration::from_millis(1)).await,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        (bank, slave.stats().clone())
    })
}

/// Fake device answering every request with the next scripted reply
fn spawn_scripted(channel: Channel, replies: Vec<Vec<u8>>) -> JoinHandle<Vec<Vec<u8>>> {
    tokio::spawn(async move {
        let mut link = RtuLink::new(channel, fast_timing(2000));
        let mut requests = Vec::new();
        for reply in replies {
            requests.push(link.receive_frame().await.unwrap());
            link.send_frame(&reply).await.unwrap();
        }
        requests
    })
}

fn framed(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    checksum::append_crc(&mut frame);
    frame
}

#[tokio::test]
async fn test_write_then_read_back_scenario() {
    init_test_logger();
    let (master_end, slave_end) = StreamChannel::pair(4096);
    let slave = spawn_slave(1, slave_end, RegisterBank::new(3));
    let mut master = RtuMaster::new(master_end, fast_timing(500));

    // echo of unit, function, address and value
    let written = master.write_single_register(1, 1, 1).await.unwrap();
    assert_eq!(written, 6);

    let written = master.write_multiple_registers(1, 1, &[2, 200]).await.unwrap();
    assert_eq!(written, 6);

    let mut registers = [0u16; 3];
    let received = master.read_holding_registers(1, 1, 3, &mut registers).await.unwrap();
    assert_eq!(registers, [2, 200, 0]);
    assert_eq!(received, 9);
    assert_eq!(status_of(&Ok(received)), 9);

    assert!(!master.link().channel().is_transmitting());
    assert_eq!(master.stats().frames_sent, 3);
    assert_eq!(master.stats().frames_received, 3);

    drop(master);
    let (bank, stats) = slave.await.unwrap();
    assert_eq!(bank.as_slice(), &[2, 200, 0]);
    assert_eq!(stats.replies, 3);
    assert_eq!(stats.exceptions, 0);
}

#[tokio::test]
async fn test_addresses_map_one_to_one() {
    let values: Vec<u16> = (1..=10).map(|i| i * 10).collect();
    let (master_end, slave_end) = StreamChannel::pair(4096);
    let slave = spawn_slave(7, slave_end, RegisterBank::from_values(values.clone()));
    let mut master = RtuMaster::new(master_end, fast_timing(500));

    for address in 1..=10u16 {
        let mut dest = [0u16; 1];
        master.read_holding_registers(7, address, 1, &mut dest).await.unwrap();
        assert_eq!(dest[0], values[address as usize - 1]);
    }

    master.write_single_register(7, 10, 0xABCD).await.unwrap();
    drop(master);
    let (bank, _) = slave.await.unwrap();
    assert_eq!(bank.get(10).unwrap(), 0xABCD);
}

#[tokio::test]
async fn test_out_of_range_addresses_raise_exceptions() {
    let (master_end, slave_end) = StreamChannel::pair(4096);
    let slave = spawn_slave(1, slave_end, RegisterBank::new(3));
    let mut master = RtuMaster::new(master_end, fast_timing(500));

    let mut dest = [0u16; 1];
    for address in [0u16, 4] {
        let result = master.read_holding_registers(1, address, 1, &mut dest).await;
        assert_eq!(result.as_ref().unwrap_err().exception_code(), Some(0x02));
        assert_eq!(status_of(&result), -2);

        let result = master.write_single_register(1, address, 9).await;
        assert_eq!(status_of(&result), -2);
    }

    let result = master.write_multiple_registers(1, 2, &[1, 2, 3]).await;
    assert_eq!(status_of(&result), -2);

    // coils are not served by this slave
    let mut coils = [false; 8];
    let result = master.read_coils(1, 1, 8, &mut coils).await;
    assert!(matches!(result, Err(ModbusError::Exception { code: 0x01, .. })));
    assert_eq!(status_of(&result), -1);

    drop(master);
    let (bank, stats) = slave.await.unwrap();
    assert_eq!(bank.as_slice(), &[0, 0, 0]);
    assert_eq!(stats.exceptions, 6);
}

#[tokio::test]
async fn test_no_device_times_out_within_bound() {
    let (master_end, _silent_end) = StreamChannel::pair(4096);
    let mut master = RtuMaster::new(master_end, fast_timing(150));

    let mut dest = [0u16; 2];
    let started = Instant::now();
    let result = master.read_holding_registers(1, 1, 2, &mut dest).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ModbusError::Timeout { .. })));
    assert_eq!(status_of(&result), 0);
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(1000));
}

#[tokio::test]
async fn test_single_bit_corruption_is_never_accepted() {
    let valid = ModbusResponse::registers(1, ModbusFunction::ReadHoldingRegisters, &[0x1234, 0x5678]).encode();
    let payload_len = valid.len() - 2;

    let mut replies = Vec::new();
    for byte in 0..payload_len {
        for bit in 0..8 {
            let mut corrupted = valid.clone();
            corrupted[byte] ^= 1 << bit;
            replies.push(corrupted);
        }
    }
    let attempts = replies.len();

    let (master_end, device_end) = StreamChannel::pair(4096);
    let device = spawn_scripted(device_end, replies);
    let mut master = RtuMaster::new(master_end, fast_timing(500));

    for _ in 0..attempts {
        let mut dest = [0u16; 2];
        let result = master.read_holding_registers(1, 1, 2, &mut dest).await;
        assert!(matches!(result, Err(ModbusError::CrcMismatch { .. })));
        assert_eq!(status_of(&result), 0);
        assert_eq!(dest, [0, 0]);
    }

    assert_eq!(master.stats().crc_errors, attempts as u64);
    assert_eq!(device.await.unwrap().len(), attempts);
}

#[tokio::test]
async fn test_corrupted_request_gets_no_reply() {
    let (master_end, slave_end) = StreamChannel::pair(4096);
    let mut raw = RtuLink::new(master_end, fast_timing(150));
    let slave = spawn_slave(1, slave_end, RegisterBank::new(3));

    let mut request = framed(&[0x01, 0x06, 0x00, 0x00, 0x00, 0x05]);
    request[4] ^= 0x80;
    raw.send_frame(&request).await.unwrap();
    assert!(matches!(raw.receive_frame().await, Err(ModbusError::Timeout { .. })));

    // a clean retry succeeds
    raw.send_frame(&framed(&[0x01, 0x06, 0x00, 0x00, 0x00, 0x05])).await.unwrap();
    assert_eq!(raw.receive_frame().await.unwrap(), framed(&[0x01, 0x06, 0x00, 0x00, 0x00, 0x05]));

    drop(raw);
    let (bank, stats) = slave.await.unwrap();
    assert_eq!(bank.as_slice(), &[5, 0, 0]);
    assert_eq!(stats.dropped_frames, 1);
}

#[tokio::test]
async fn test_coil_packing_on_the_wire() {
    let write_ack = framed(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x03]);
    let read_reply = framed(&[0x01, 0x01, 0x01, 0b0000_0101]);

    let (master_end, device_end) = StreamChannel::pair(4096);
    let device = spawn_scripted(device_end, vec![write_ack, read_reply]);
    let mut master = RtuMaster::new(master_end, fast_timing(500));

    assert_eq!(master.write_multiple_coils(1, 1, &[true, false, true]).await.unwrap(), 6);

    // 01 01 01 05, the CRC is not counted
    let mut coils = [true; 10];
    assert_eq!(master.read_coils(1, 1, 3, &mut coils).await.unwrap(), 4);
    assert_eq!(&coils[..3], &[true, false, true]);
    assert!(coils[3..].iter().all(|coil| !coil));

    let requests = device.await.unwrap();
    assert_eq!(requests[0], framed(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0b0000_0101]));
    assert_eq!(requests[1], framed(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x03]));
}

#[tokio::test]
async fn test_discrete_inputs_and_single_coil_on_the_wire() {
    let inputs_reply = framed(&[0x01, 0x02, 0x01, 0b0000_0110]);
    let coil_echo = framed(&[0x01, 0x05, 0x00, 0x04, 0xFF, 0x00]);

    let (master_end, device_end) = StreamChannel::pair(4096);
    let device = spawn_scripted(device_end, vec![inputs_reply, coil_echo]);
    let mut master = RtuMaster::new(master_end, fast_timing(500));

    let mut inputs = [true; 5];
    assert_eq!(master.read_discrete_inputs(1, 1, 3, &mut inputs).await.unwrap(), 4);
    assert_eq!(inputs, [false, true, true, false, false]);

    assert_eq!(master.write_single_coil(1, 5, true).await.unwrap(), 6);

    let requests = device.await.unwrap();
    assert_eq!(requests[0], framed(&[0x01, 0x02, 0x00, 0x00, 0x00, 0x03]));
    assert_eq!(requests[1], framed(&[0x01, 0x05, 0x00, 0x04, 0xFF, 0x00]));
}

#[tokio::test]
async fn test_two_slaves_share_the_line_only_one_answers() {
    let (master_end, slave_end) = StreamChannel::pair(4096);
    let slave = spawn_slave(2, slave_end, RegisterBank::new(3));
    let mut master = RtuMaster::new(master_end, fast_timing(150));

    // unit 1 is not on this line
    let result = master.write_single_register(1, 1, 5).await;
    assert!(matches!(result, Err(ModbusError::Timeout { .. })));

    assert_eq!(master.write_single_register(2, 1, 5).await.unwrap(), 6);

    // broadcast writes are executed silently
    assert_eq!(master.write_multiple_registers(0, 2, &[7, 8]).await.unwrap(), 0);
    sleep(Duration::from_millis(50)).await;

    drop(master);
    let (bank, stats) = slave.await.unwrap();
    assert_eq!(bank.as_slice(), &[5, 7, 8]);
    assert_eq!(stats.foreign_frames, 1);
}
