//! Decode/register-read stage: operand resolution through forwarding, RAW
//! stalls on busy sources, and WAW reservation of the destination.
//!
//! Resolution runs in two passes so a stalled instruction never mutates the
//! reservation vector: first determine whether *any* operand is blocked,
//! then — only on a clean pass — commit destination reservations and
//! advance the latch. Mutating `reservation` eagerly (as read literally from
//! the per-opcode ordering notes) would have a stalled instruction reserve
//! its own destination, then see that same bit as "busy" on the very next
//! retry and stall on itself forever; committing on advance avoids that.

use crate::isa::Opcode;
use crate::machine::Machine;

fn try_resolve(m: &Machine, reg: u8) -> Option<i64> {
    if let Some(v) = m.forwarding.resolve(reg) {
        Some(v)
    } else if m.reservation.is_busy(reg) {
        None
    } else {
        Some(m.regs.read(reg))
    }
}

fn dest_blocked(m: &Machine, rd: u8, sources: &[u8]) -> bool {
    m.reservation.is_busy(rd) && !sources.contains(&rd)
}

pub(crate) fn run(m: &mut Machine) {
    if !m.decode.has_insn {
        return;
    }
    let insn = m.decode.op.clone().expect("has_insn implies op");

    let mut rs1_value = 0i64;
    let mut rs2_value = 0i64;
    let mut stalled = false;

    macro_rules! need {
        ($reg:expr) => {
            match try_resolve(m, $reg) {
                Some(v) => v,
                None => {
                    stalled = true;
                    0
                }
            }
        };
    }

    use Opcode::*;
    match insn.opcode {
        Add | Sub | Mul | Div | And | Or | Xor => {
            let (rs1, rs2) = (insn.rs1.unwrap(), insn.rs2.unwrap());
            rs1_value = need!(rs1);
            if !stalled {
                rs2_value = need!(rs2);
            }
            if !stalled {
                let rd = insn.rd.unwrap();
                stalled = dest_blocked(m, rd, &[rs1, rs2]);
            }
        }
        Addl | Subl => {
            let rs1 = insn.rs1.unwrap();
            rs1_value = need!(rs1);
            if !stalled {
                let rd = insn.rd.unwrap();
                stalled = dest_blocked(m, rd, &[rs1]);
            }
        }
        Movc => {
            let rd = insn.rd.unwrap();
            stalled = dest_blocked(m, rd, &[]);
        }
        Load => {
            let rd = insn.rd.unwrap();
            let rs1 = insn.rs1.unwrap();
            stalled = dest_blocked(m, rd, &[rs1]);
            if !stalled {
                rs1_value = need!(rs1);
            }
        }
        Loadp => {
            let rs1 = insn.rs1.unwrap();
            rs1_value = need!(rs1);
            if !stalled {
                let rd = insn.rd.unwrap();
                stalled = dest_blocked(m, rd, &[rs1]);
            }
        }
        Store => {
            let (rs1, rs2) = (insn.rs1.unwrap(), insn.rs2.unwrap());
            rs1_value = need!(rs1);
            if !stalled {
                rs2_value = need!(rs2);
            }
        }
        Storep => {
            let (rs1, rs2) = (insn.rs1.unwrap(), insn.rs2.unwrap());
            rs1_value = need!(rs1);
            if !stalled {
                rs2_value = need!(rs2);
            }
        }
        Cmp => {
            let (rs1, rs2) = (insn.rs1.unwrap(), insn.rs2.unwrap());
            rs1_value = need!(rs1);
            if !stalled {
                rs2_value = need!(rs2);
            }
        }
        Cml => {
            let rs1 = insn.rs1.unwrap();
            rs1_value = need!(rs1);
        }
        Jalr => {
            let rs1 = insn.rs1.unwrap();
            let rd = insn.rd.unwrap();
            stalled = dest_blocked(m, rd, &[rs1]);
            if !stalled {
                rs1_value = need!(rs1);
            }
        }
        Jump => {
            let rs1 = insn.rs1.unwrap();
            rs1_value = need!(rs1);
        }
        Bz | Bnz | Bp | Bnp | Bn | Bnn | Halt | Nop => {}
    }

    if stalled {
        tracing::debug!("decode: stall on {insn}");
        m.fetch_from_next_cycle = true;
        return;
    }

    match insn.opcode {
        Add | Sub | Mul | Div | And | Or | Xor => {
            let (rd, rs1, rs2) = (insn.rd.unwrap(), insn.rs1.unwrap(), insn.rs2.unwrap());
            if rd != rs1 && rd != rs2 {
                m.reservation.reserve(rd);
            }
        }
        Addl | Subl | Load => {
            let (rd, rs1) = (insn.rd.unwrap(), insn.rs1.unwrap());
            if rd != rs1 {
                m.reservation.reserve(rd);
            }
        }
        Movc => m.reservation.reserve(insn.rd.unwrap()),
        Loadp => {
            let (rd, rs1) = (insn.rd.unwrap(), insn.rs1.unwrap());
            if rd != rs1 {
                m.reservation.reserve(rd);
            }
            m.reservation.reserve(rs1);
        }
        Storep => m.reservation.reserve(insn.rs2.unwrap()),
        Jalr => {
            let (rd, rs1) = (insn.rd.unwrap(), insn.rs1.unwrap());
            if rd != rs1 {
                m.reservation.reserve(rd);
            }
        }
        _ => {}
    }

    m.decode.rs1_value = rs1_value;
    m.decode.rs2_value = rs2_value;
    m.execute = m.decode.clone();
    m.decode.clear();
}
