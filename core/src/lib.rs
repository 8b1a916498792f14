//! Pipeline control logic for the APEX five-stage in-order simulator: the
//! instruction/ISA model, register file and flags, hazard resolver,
//! branch target buffer, and the cycle-stepping machine.
//!
//! External collaborators (assembler, CLI) depend on this crate; it has no
//! knowledge of assembly text or process arguments.

pub mod btb;
mod decode;
pub mod error;
mod execute;
mod fetch;
pub mod hazard;
pub mod isa;
pub mod latch;
pub mod machine;
mod mem_stage;
pub mod memory;
pub mod regfile;
mod writeback;

pub use btb::Btb;
pub use error::CoreError;
pub use isa::{Instruction, Opcode, CODE_BASE, INSN_WIDTH, NUM_REGS};
pub use machine::{Machine, StageSnapshot};
pub use regfile::Flags;
