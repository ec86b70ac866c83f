/// CRC-16 (Modbus variant) for RTU frames
///
/// The checksum is returned byte-swapped relative to the register the
/// algorithm accumulates in, so writing it high byte first puts the
/// algorithm's low byte on the wire first, as RTU framing requires.

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};

/// Reflected 0xA001 polynomial, 0xFFFF initial value, no final XOR
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Number of checksum bytes trailing every frame
pub const CHECKSUM_SIZE: usize = 2;

/// Compute the CRC over `bytes[start..start + count]`
///
/// The range is clipped to the slice, so the function never fails.
pub fn crc(bytes: &[u8], start: usize, count: usize) -> u16 {
    let end = start.saturating_add(count).min(bytes.len());
    let start = start.min(end);
    CRC_MODBUS.checksum(&bytes[start..end]).swap_bytes()
}

/// Append the checksum of the whole frame in wire order
pub fn append_crc(frame: &mut Vec<u8>) {
    let value = crc(frame, 0, frame.len());
    frame.extend_from_slice(&value.to_be_bytes());
}

/// Validate the trailing checksum of a received frame
///
/// Frames shorter than unit id + function + checksum are rejected as
/// malformed before the checksum is looked at.
pub fn check_crc(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() < 2 + CHECKSUM_SIZE {
        return Err(ModbusError::frame(format!("RTU frame too short: {} bytes", frame.len())));
    }

    let body_len = frame.len() - CHECKSUM_SIZE;
    let expected = crc(frame, 0, body_len);
    let actual = u16::from_be_bytes([frame[body_len], frame[body_len + 1]]);

    if expected != actual {
        return Err(ModbusError::crc_mismatch(expected, actual));
    }
    Ok(())
}
