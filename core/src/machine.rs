//! The machine: owns all architectural and control state and drives the
//! five stages in reverse pipeline order each cycle.

use crate::btb::Btb;
use crate::error::CoreError;
use crate::hazard::{ForwardingBuffers, ReservationVector};
use crate::isa::{Instruction, CODE_BASE};
use crate::latch::StageLatch;
use crate::regfile::{Flags, RegisterFile};
use crate::memory::DataMemory;
use crate::{decode, execute, fetch, mem_stage, writeback};

/// A labelled snapshot of one stage latch for the observation interface.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub name: &'static str,
    pub fields: Vec<(&'static str, String)>,
}

fn snapshot(name: &'static str, latch: &StageLatch) -> StageSnapshot {
    let fields = if latch.has_insn {
        let insn = latch.op.as_ref().map(|i| i.to_string()).unwrap_or_default();
        vec![("pc", format!("{:#x}", latch.pc)), ("instruction", insn)]
    } else {
        vec![("instruction", "Empty".to_string())]
    };
    StageSnapshot { name, fields }
}

pub struct Machine {
    pub pc: u32,
    pub regs: RegisterFile,
    pub flags: Flags,
    pub reservation: ReservationVector,
    pub forwarding: ForwardingBuffers,
    pub data_memory: DataMemory,
    pub code: Vec<Instruction>,
    pub fetch_from_next_cycle: bool,
    pub btb: Option<Btb>,

    pub(crate) fetch: StageLatch,
    pub(crate) decode: StageLatch,
    pub(crate) execute: StageLatch,
    pub(crate) memory: StageLatch,
    pub(crate) writeback: StageLatch,

    pub clock: u64,
    pub retired: u64,
    pub terminated: bool,
}

impl Machine {
    /// Build a machine with code memory loaded and the fetch unit primed to
    /// start issuing at `CODE_BASE`. `btb_size` enables the branch predictor
    /// variant when `Some`.
    pub fn new(code: Vec<Instruction>, btb_size: Option<usize>) -> Self {
        let mut fetch = StageLatch::default();
        fetch.has_insn = true;
        Self {
            pc: CODE_BASE,
            regs: RegisterFile::default(),
            flags: Flags::default(),
            reservation: ReservationVector::default(),
            forwarding: ForwardingBuffers::default(),
            data_memory: DataMemory::default(),
            code,
            fetch_from_next_cycle: false,
            btb: btb_size.map(Btb::new),
            fetch,
            decode: StageLatch::default(),
            execute: StageLatch::default(),
            memory: StageLatch::default(),
            writeback: StageLatch::default(),
            clock: 0,
            retired: 0,
            terminated: false,
        }
    }

    /// Advance exactly one cycle. Stages run in reverse pipeline order so
    /// each reads the latch its successor wrote last cycle before that
    /// successor overwrites it (spec §2, §5, §9). Returns `true` once this
    /// cycle retired HALT.
    pub fn step(&mut self) -> Result<bool, CoreError> {
        if self.terminated {
            return Ok(true);
        }
        self.clock += 1;
        tracing::debug!("cycle {} begin", self.clock);
        let halted = writeback::run(self);
        mem_stage::run(self)?;
        execute::run(self)?;
        decode::run(self);
        fetch::run(self)?;
        if halted {
            self.terminated = true;
        }
        Ok(self.terminated)
    }

    /// Run until HALT retires. A program missing HALT eventually overruns
    /// code memory and surfaces `CoreError::FetchOutOfRange` (spec §7, open
    /// question 3: unspecified, so this is the natural consequence rather
    /// than an artificial cycle cap).
    pub fn run_to_halt(&mut self) -> Result<(), CoreError> {
        while !self.terminated {
            self.step()?;
        }
        Ok(())
    }

    /// Run at most `max_cycles` cycles, stopping early if HALT retires.
    pub fn simulate(&mut self, max_cycles: u64) -> Result<(), CoreError> {
        for _ in 0..max_cycles {
            if self.terminated {
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    pub fn stage_snapshots(&self) -> Vec<StageSnapshot> {
        vec![
            snapshot("Fetch", &self.fetch),
            snapshot("Decode/RF", &self.decode),
            snapshot("Execute", &self.execute),
            snapshot("Memory", &self.memory),
            snapshot("Writeback", &self.writeback),
        ]
    }

    pub fn register_dump(&self) -> Vec<(u8, i64)> {
        self.regs.entries().collect()
    }

    pub fn nonzero_memory(&self) -> Vec<(usize, i64)> {
        self.data_memory.nonzero().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode::*;
    use crate::isa::Instruction as I;

    fn run(insns: Vec<I>) -> Machine {
        let mut m = Machine::new(insns, None);
        m.run_to_halt().expect("program must terminate cleanly");
        m
    }

    #[test]
    fn scenario_straight_line_add() {
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(5),
            I::new(Movc).with_rd(2).with_imm(7),
            I::new(Add).with_rd(3).with_rs1(1).with_rs2(2),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(1), 5);
        assert_eq!(m.regs.read(2), 7);
        assert_eq!(m.regs.read(3), 12);
        assert_eq!(m.retired, 4);
    }

    #[test]
    fn scenario_store_then_load() {
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(10),
            I::new(Store).with_rs1(1).with_rs2(2).with_imm(4),
            I::new(Load).with_rd(3).with_rs1(2).with_imm(4),
            I::new(Halt),
        ]);
        assert_eq!(m.data_memory.read(0, 4).unwrap(), 10);
        assert_eq!(m.regs.read(3), 10);
    }

    #[test]
    fn scenario_branch_not_taken() {
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(0),
            I::new(Movc).with_rd(2).with_imm(3),
            I::new(Cmp).with_rs1(1).with_rs2(2),
            I::new(Bz).with_imm(8),
            I::new(Movc).with_rd(4).with_imm(1),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(4), 1);
    }

    #[test]
    fn scenario_branch_taken_skips_block() {
        // BZ's own fetch-time address is 4000 + 2*4 = 4008; jumping +12
        // lands two instructions down, past the first HALT, at the second
        // MOVC (4008+12 = 4020). The prose in spec §8 uses an offset that
        // only skips one instruction (landing on the first HALT) — not
        // reachable together with the narrated R5=2 outcome, so this test
        // uses the byte offset that actually realises the described
        // control flow instead of the literal immediate.
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(0),
            I::new(Cml).with_rs1(1).with_imm(0),
            I::new(Bz).with_imm(12),
            I::new(Movc).with_rd(4).with_imm(1),
            I::new(Halt),
            I::new(Movc).with_rd(5).with_imm(2),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(5), 2);
        assert_eq!(m.regs.read(4), 0);
    }

    #[test]
    fn scenario_addl_forwarded_without_stall() {
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(9),
            I::new(Addl).with_rd(2).with_rs1(1).with_imm(1),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(2), 10);
        // 3 instructions through a 5-stage pipeline with no stalls drain
        // in exactly instructions + stages - 1 cycles.
        assert_eq!(m.clock, 3 + 5 - 1);
    }

    #[test]
    fn scenario_loadp_post_increments_base() {
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(0),
            I::new(Movc).with_rd(4).with_imm(77),
            I::new(Store).with_rs1(4).with_rs2(1).with_imm(0),
            I::new(Loadp).with_rd(3).with_rs1(1).with_imm(0),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(1), 4);
        assert_eq!(m.regs.read(3), 77);
    }

    #[test]
    fn alu_producer_two_apart_forwards_from_memory_stage_without_stall() {
        // ADDL's source is two instructions behind its producer (with a NOP
        // filler in between), so by the time ADDL reaches decode, MOVC has
        // already moved from execute into memory; decode must pick the
        // value up from `mem_fwd`, not `exec_fwd` (spec §4.4: every
        // destination-bearing op republishes mem_fwd, not just loads).
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(9),
            I::new(Nop),
            I::new(Addl).with_rd(2).with_rs1(1).with_imm(1),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(2), 10);
        assert_eq!(m.clock, 4 + 5 - 1);
    }

    #[test]
    fn load_use_hazard_stalls_then_forwards_from_memory_stage() {
        // ADDL's source isn't ready at its first decode attempt (LOAD is
        // still in execute); decode must stall one cycle and then pick the
        // value up from `mem_fwd` once LOAD reaches memory.
        let m = run(vec![
            I::new(Movc).with_rd(1).with_imm(20),
            I::new(Movc).with_rd(2).with_imm(0),
            I::new(Store).with_rs1(1).with_rs2(2).with_imm(0),
            I::new(Load).with_rd(3).with_rs1(2).with_imm(0),
            I::new(Addl).with_rd(4).with_rs1(3).with_imm(1),
            I::new(Halt),
        ]);
        assert_eq!(m.regs.read(4), 21);
    }

    #[test]
    fn reservation_clears_after_writeback() {
        let mut m = Machine::new(
            vec![
                I::new(Movc).with_rd(1).with_imm(3),
                I::new(Halt),
            ],
            None,
        );
        m.run_to_halt().unwrap();
        assert!(!m.reservation.is_busy(1));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let mut m = Machine::new(
            vec![
                I::new(Movc).with_rd(1).with_imm(5),
                I::new(Movc).with_rd(2).with_imm(0),
                I::new(Div).with_rd(3).with_rs1(1).with_rs2(2),
                I::new(Halt),
            ],
            None,
        );
        let err = m.run_to_halt().unwrap_err();
        assert!(matches!(err, CoreError::DivisionByZero { .. }));
    }

    #[test]
    fn fetch_past_code_memory_without_halt_errors() {
        let mut m = Machine::new(vec![I::new(Movc).with_rd(1).with_imm(1)], None);
        let err = m.run_to_halt().unwrap_err();
        assert!(matches!(err, CoreError::FetchOutOfRange { .. }));
    }

    #[test]
    fn simulate_respects_cycle_budget() {
        let mut m = Machine::new(
            vec![
                I::new(Movc).with_rd(1).with_imm(1),
                I::new(Movc).with_rd(2).with_imm(2),
                I::new(Halt),
            ],
            None,
        );
        m.simulate(2).unwrap();
        assert!(!m.terminated);
        assert_eq!(m.clock, 2);
    }

    fn counted_loop() -> Vec<I> {
        vec![
            I::new(Movc).with_rd(1).with_imm(3),            // 4000
            I::new(Subl).with_rd(1).with_rs1(1).with_imm(1), // 4004: loop top
            I::new(Cml).with_rs1(1).with_imm(0),             // 4008
            I::new(Bnz).with_imm(-8),                        // 4012 -> back to 4004
            I::new(Halt),                                    // 4016
        ]
    }

    #[test]
    fn btb_speculation_does_not_change_architectural_outcome() {
        // A counted loop exercises repeated fetch-time misprediction and
        // recovery; the final register state and retired count must match
        // the non-speculative run regardless.
        let baseline = run(counted_loop());
        let mut speculative = Machine::new(counted_loop(), Some(4));
        speculative.run_to_halt().expect("program must terminate cleanly");

        assert_eq!(baseline.regs.read(1), 0);
        assert_eq!(speculative.regs.read(1), 0);
        assert_eq!(baseline.retired, speculative.retired);
    }
}
