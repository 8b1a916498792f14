//! Memory stage: data memory access for LOAD/LOADP/STORE/STOREP, and a
//! second forwarding point republishing every destination-bearing
//! instruction's result (spec §4.4: "All ops update mem_fwd ... if they
//! have a destination"), not just the loaded value.

use crate::error::CoreError;
use crate::isa::Opcode;
use crate::machine::Machine;

pub(crate) fn run(m: &mut Machine) -> Result<(), CoreError> {
    m.forwarding.mem.clear();

    if !m.memory.has_insn {
        return Ok(());
    }

    let insn = m.memory.op.clone().expect("has_insn implies op");
    let pc = m.memory.pc;
    use Opcode::*;

    match insn.opcode {
        Load | Loadp => {
            let value = m.data_memory.read(pc, m.memory.memory_address)?;
            m.memory.result_buffer = value;
            m.forwarding.mem.publish(insn.rd.unwrap(), value);
        }
        Store | Storep => {
            m.data_memory.write(pc, m.memory.memory_address, m.memory.rs1_value)?;
        }
        Add | Sub | Mul | Div | And | Or | Xor | Addl | Subl | Movc => {
            m.forwarding.mem.publish(insn.rd.unwrap(), m.memory.result_buffer);
        }
        _ => {}
    }

    m.writeback = m.memory.clone();
    m.memory.clear();
    Ok(())
}
