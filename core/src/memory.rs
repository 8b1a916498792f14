//! Linearly addressable data memory. Addresses are used directly as word
//! indices (matching the original reference's `data_memory[addr]` access,
//! rather than a byte address divided by word size).

use crate::error::CoreError;

/// Number of addressable words. The original C reference's `DATA_MEMORY_SIZE`
/// macro wasn't part of the retrieved source; 4096 words is a generous
/// pedagogical default, documented in DESIGN.md.
pub const DATA_MEMORY_WORDS: usize = 4096;

#[derive(Debug, Clone)]
pub struct DataMemory {
    words: Vec<i64>,
}

impl Default for DataMemory {
    fn default() -> Self {
        Self {
            words: vec![0; DATA_MEMORY_WORDS],
        }
    }
}

impl DataMemory {
    pub fn read(&self, pc: u32, address: i64) -> Result<i64, CoreError> {
        self.index(pc, address).map(|i| self.words[i])
    }

    pub fn write(&mut self, pc: u32, address: i64, value: i64) -> Result<(), CoreError> {
        let i = self.index(pc, address)?;
        self.words[i] = value;
        Ok(())
    }

    fn index(&self, pc: u32, address: i64) -> Result<usize, CoreError> {
        if address < 0 || address as usize >= self.words.len() {
            Err(CoreError::DataAddressOutOfRange { pc, address })
        } else {
            Ok(address as usize)
        }
    }

    /// Non-zero (address, value) pairs for the observation interface.
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(i, v)| (i, *v))
    }
}
