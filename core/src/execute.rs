//! Execute stage: ALU/address computation, flag updates, same-cycle
//! forwarding publication, and branch/jump resolution.

use crate::error::CoreError;
use crate::isa::Opcode;
use crate::machine::Machine;

pub(crate) fn run(m: &mut Machine) -> Result<(), CoreError> {
    // Reset every cycle regardless of occupancy so a cycle with nothing in
    // execute never leaks a stale forward to decode (spec §9 redesign note).
    m.forwarding.exec.clear();

    if !m.execute.has_insn {
        return Ok(());
    }

    let insn = m.execute.op.clone().expect("has_insn implies op");
    let pc = m.execute.pc;
    let (rs1_value, rs2_value) = (m.execute.rs1_value, m.execute.rs2_value);
    use Opcode::*;

    match insn.opcode {
        Add => {
            m.execute.result_buffer = rs1_value.wrapping_add(rs2_value);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Sub => {
            m.execute.result_buffer = rs1_value.wrapping_sub(rs2_value);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Mul => {
            m.execute.result_buffer = rs1_value.wrapping_mul(rs2_value);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Div => {
            if rs2_value == 0 {
                return Err(CoreError::DivisionByZero { pc });
            }
            m.execute.result_buffer = rs1_value.wrapping_div(rs2_value);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        And => {
            // Logical (not bitwise) AND, matching the reference's `&&` use
            // on a bitwise opcode; kept intentionally, see DESIGN.md.
            m.execute.result_buffer = i64::from(rs1_value != 0 && rs2_value != 0);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Or => {
            m.execute.result_buffer = rs1_value | rs2_value;
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Xor => {
            m.execute.result_buffer = rs1_value ^ rs2_value;
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Addl => {
            m.execute.result_buffer = rs1_value.wrapping_add(insn.imm);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Subl => {
            m.execute.result_buffer = rs1_value.wrapping_sub(insn.imm);
            m.flags.set_from_result(m.execute.result_buffer);
        }
        Movc => {
            m.execute.result_buffer = insn.imm;
        }
        Load => {
            m.execute.memory_address = rs1_value.wrapping_add(insn.imm);
        }
        Loadp => {
            m.execute.memory_address = rs1_value.wrapping_add(insn.imm);
            m.execute.aux_buffer = rs1_value.wrapping_add(4);
            m.forwarding.exec.publish(insn.rs1.unwrap(), m.execute.aux_buffer);
        }
        Store => {
            m.execute.memory_address = rs2_value.wrapping_add(insn.imm);
        }
        Storep => {
            m.execute.memory_address = rs2_value.wrapping_add(insn.imm);
            m.execute.aux_buffer = rs2_value.wrapping_add(4);
            m.forwarding.exec.publish(insn.rs2.unwrap(), m.execute.aux_buffer);
        }
        Cmp => m.flags.set_from_compare(rs1_value, rs2_value),
        Cml => m.flags.set_from_compare(rs1_value, insn.imm),
        Bz | Bnz | Bp | Bnp | Bn | Bnn => {
            let taken = match insn.opcode {
                Bz => m.flags.zero,
                Bnz => !m.flags.zero,
                Bp => m.flags.positive,
                Bnp => !m.flags.positive,
                Bn => m.flags.negative,
                Bnn => !m.flags.negative,
                _ => unreachable!(),
            };
            let target = (pc as i64 + insn.imm) as u32;
            resolve_branch(m, pc, taken, target);
        }
        Jump => {
            let target = (rs1_value + insn.imm) as u32;
            resolve_branch(m, pc, true, target);
        }
        Jalr => {
            let target = (rs1_value + insn.imm) as u32;
            m.execute.jump_buffer = pc as i64 + crate::isa::INSN_WIDTH as i64;
            m.forwarding.exec.publish(insn.rd.unwrap(), m.execute.jump_buffer);
            resolve_branch(m, pc, true, target);
        }
        Halt | Nop => {}
    }

    if matches!(insn.opcode, Add | Sub | Mul | Div | And | Or | Xor | Addl | Subl | Movc) {
        m.forwarding.exec.publish(insn.rd.unwrap(), m.execute.result_buffer);
    }

    m.memory = m.execute.clone();
    m.execute.clear();
    Ok(())
}

/// Compare the fetch-time prediction against the resolved outcome and flush
/// on disagreement. With no BTB configured `predicted_target` is always
/// `None`, so this reduces to "any taken branch/jump flushes" (spec §4.1).
fn resolve_branch(m: &mut Machine, origin_pc: u32, taken: bool, target: u32) {
    let actual_target = taken.then_some(target);
    let mispredicted = actual_target != m.execute.predicted_target;

    if mispredicted {
        tracing::debug!(
            "execute: flush at pc={:#x}, redirect to {:#x} (predicted {:?})",
            origin_pc,
            target,
            m.execute.predicted_target
        );
        m.pc = target;
        m.fetch_from_next_cycle = true;
        m.decode.clear();
        m.fetch.has_insn = true;
    }

    if let Some(btb) = &mut m.btb {
        btb.train(origin_pc, taken, target);
    }
}
