/// Holding register storage served by the slave
///
/// The bank is a fixed-size block of 16-bit cells owned by the host
/// application. Addresses are 1-based: address `a` maps to cell `a - 1`.
/// Every accessor checks the range and reports `InvalidAddress` instead of
/// touching memory outside the block.

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusAddress, ModbusValue};

/// Fixed-size register bank with 1-based addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    cells: Vec<ModbusValue>,
}

impl RegisterBank {
    /// Create a bank of `size` registers, all zero
    pub fn new(size: usize) -> Self {
        Self { cells: vec![0; size] }
    }

    /// Create a bank holding the given initial values
    pub fn from_values(values: Vec<ModbusValue>) -> Self {
        Self { cells: values }
    }

    /// Number of registers in the bank
    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Whether `count` registers starting at `address` all lie in `[1, size]`
    ///
    /// An empty range is never contained.
    pub fn contains_range(&self, address: ModbusAddress, count: u16) -> bool {
        let start = address as usize;
        let count = count as usize;
        start >= 1 && count >= 1 && start - 1 + count <= self.cells.len()
    }

    /// Read one register
    pub fn get(&self, address: ModbusAddress) -> ModbusResult<ModbusValue> {
        let index = self.index_of(address, 1)?;
        Ok(self.cells[index])
    }

    /// Write one register
    pub fn set(&mut self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<()> {
        let index = self.index_of(address, 1)?;
        self.cells[index] = value;
        Ok(())
    }

    /// Read `count` consecutive registers starting at `address`
    pub fn read(&self, address: ModbusAddress, count: u16) -> ModbusResult<&[ModbusValue]> {
        let index = self.index_of(address, count)?;
        Ok(&self.cells[index..index + count as usize])
    }

    /// Write consecutive registers starting at `address`
    ///
    /// Nothing is written when any part of the range is outside the bank.
    pub fn write(&mut self, address: ModbusAddress, values: &[ModbusValue]) -> ModbusResult<()> {
        let count = u16::try_from(values.len())
            .map_err(|_| ModbusError::invalid_address(address, u16::MAX))?;
        let index = self.index_of(address, count)?;
        self.cells[index..index + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// All cells, index 0 holding address 1
    pub fn as_slice(&self) -> &[ModbusValue] {
        &self.cells
    }

    fn index_of(&self, address: ModbusAddress, count: u16) -> ModbusResult<usize> {
        if !self.contains_range(address, count) {
            return Err(ModbusError::invalid_address(address, count));
        }
        Ok(address as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_register_access() {
        let mut bank = RegisterBank::new(3);
        bank.set(1, 42).unwrap();
        bank.set(3, 0xFFFF).unwrap();

        assert_eq!(bank.get(1).unwrap(), 42);
        assert_eq!(bank.get(2).unwrap(), 0);
        assert_eq!(bank.as_slice(), &[42, 0, 0xFFFF]);
        // cells are signed-capable through a plain cast
        assert_eq!(bank.get(3).unwrap() as i16, -1);
    }

    #[test]
    fn test_range_operations() {
        let mut bank = RegisterBank::new(5);
        bank.write(2, &[100, 200, 300]).unwrap();

        assert_eq!(bank.read(2, 3).unwrap(), &[100, 200, 300]);
        assert_eq!(bank.read(1, 5).unwrap(), &[0, 100, 200, 300, 0]);
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let mut bank = RegisterBank::from_values(vec![1, 2, 3]);

        assert_eq!(bank.get(0), Err(ModbusError::invalid_address(0, 1)));
        assert_eq!(bank.get(4), Err(ModbusError::invalid_address(4, 1)));
        assert!(bank.read(2, 3).is_err());
        assert!(bank.read(1, 0).is_err());
        assert!(bank.read(0xFFFF, 2).is_err());

        assert!(bank.write(3, &[9, 9]).is_err());
        assert_eq!(bank.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_contains_range_edges() {
        let bank = RegisterBank::new(10);
        assert!(bank.contains_range(1, 10));
        assert!(bank.contains_range(10, 1));
        assert!(!bank.contains_range(0, 1));
        assert!(!bank.contains_range(11, 1));
        assert!(!bank.contains_range(5, 6));
        assert!(!RegisterBank::new(0).contains_range(1, 1));
    }
}
