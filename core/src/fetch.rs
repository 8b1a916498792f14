//! Fetch stage: program counter management, code-memory lookup, and (when a
//! BTB is configured) speculative redirection on branches/jumps.

use crate::error::CoreError;
use crate::machine::Machine;

pub(crate) fn run(m: &mut Machine) -> Result<(), CoreError> {
    if !m.fetch.has_insn {
        return Ok(());
    }

    if m.fetch_from_next_cycle {
        m.fetch_from_next_cycle = false;
        return Ok(());
    }

    let idx = ((m.pc - crate::isa::CODE_BASE) / crate::isa::INSN_WIDTH) as usize;
    let insn = m
        .code
        .get(idx)
        .cloned()
        .ok_or(CoreError::FetchOutOfRange { pc: m.pc })?;

    m.fetch.pc = m.pc;
    let halted = insn.opcode == crate::isa::Opcode::Halt;
    tracing::trace!("fetch: pc={:#x} insn={}", m.pc, insn);
    m.fetch.op = Some(insn.clone());

    let mut next_pc = m.pc + crate::isa::INSN_WIDTH;
    let mut predicted_target = None;

    if insn.opcode.is_control_flow() {
        if let Some(btb) = &m.btb {
            predicted_target = btb.predict(m.fetch.pc);
        }
        if let Some(target) = predicted_target {
            next_pc = target;
            m.fetch_from_next_cycle = true;
        }
    }
    m.fetch.predicted_target = predicted_target;

    m.pc = next_pc;
    m.decode = m.fetch.clone();

    if insn.opcode.is_control_flow() {
        if let Some(btb) = &mut m.btb {
            btb.insert_on_miss(m.fetch.pc);
        }
    }

    if halted {
        m.fetch.clear();
    }

    Ok(())
}
