//! Writeback stage: commits results to the register file, clears the
//! destination's reservation, and retires the instruction.

use crate::isa::Opcode;
use crate::machine::Machine;

/// Returns `true` if the retiring instruction is HALT, signalling the
/// machine to stop issuing further cycles once this one finishes.
pub(crate) fn run(m: &mut Machine) -> bool {
    if !m.writeback.has_insn {
        return false;
    }

    let insn = m.writeback.op.clone().expect("has_insn implies op");
    use Opcode::*;

    match insn.opcode {
        Add | Sub | Mul | Div | And | Or | Xor | Addl | Subl | Movc => {
            let rd = insn.rd.unwrap();
            m.regs.write(rd, m.writeback.result_buffer);
            m.reservation.clear(rd);
        }
        Load => {
            let rd = insn.rd.unwrap();
            m.regs.write(rd, m.writeback.result_buffer);
            m.reservation.clear(rd);
        }
        Loadp => {
            let rd = insn.rd.unwrap();
            let rs1 = insn.rs1.unwrap();
            m.regs.write(rd, m.writeback.result_buffer);
            m.regs.write(rs1, m.writeback.aux_buffer);
            m.reservation.clear(rd);
            m.reservation.clear(rs1);
        }
        Storep => {
            let rs2 = insn.rs2.unwrap();
            m.regs.write(rs2, m.writeback.aux_buffer);
            m.reservation.clear(rs2);
        }
        Jalr => {
            let rd = insn.rd.unwrap();
            m.regs.write(rd, m.writeback.jump_buffer);
            m.reservation.clear(rd);
        }
        Store | Cmp | Cml | Bz | Bnz | Bp | Bnp | Bn | Bnn | Jump | Halt | Nop => {}
    }

    m.retired += 1;
    tracing::trace!("writeback: retired {insn} (total {})", m.retired);
    let halted = insn.opcode == Opcode::Halt;
    m.writeback.clear();
    halted
}
