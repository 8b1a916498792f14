//! Runtime error kinds the core can raise. Initialisation and CLI-surface
//! errors are handled by the external collaborators (assembler, CLI) using
//! `anyhow`; the core itself stays dependency-light and reports only the
//! two runtime-undefined conditions spec §7 calls out.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// `DIV` executed with a zero divisor.
    DivisionByZero { pc: u32 },
    /// Fetch indexed past the end of code memory without having retired HALT.
    FetchOutOfRange { pc: u32 },
    /// A load/store computed an address outside data memory.
    DataAddressOutOfRange { pc: u32, address: i64 },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::DivisionByZero { pc } => {
                write!(f, "division by zero at pc={pc:#x}")
            }
            CoreError::FetchOutOfRange { pc } => {
                write!(f, "fetch past end of code memory at pc={pc:#x}")
            }
            CoreError::DataAddressOutOfRange { pc, address } => {
                write!(f, "data address {address} out of range at pc={pc:#x}")
            }
        }
    }
}

impl std::error::Error for CoreError {}
