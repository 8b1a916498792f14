//! Reservation vector and forwarding buffers: the single source of truth
//! for RAW/WAW stalls and same-cycle operand forwarding.

use crate::isa::NUM_REGS;

/// Per-register "busy" bits. `reservation[r] == true` iff some in-flight
/// producer in decode/execute/memory has not yet committed `r` (invariant P1).
#[derive(Debug, Clone)]
pub struct ReservationVector {
    busy: [bool; NUM_REGS],
}

impl Default for ReservationVector {
    fn default() -> Self {
        Self {
            busy: [false; NUM_REGS],
        }
    }
}

impl ReservationVector {
    pub fn is_busy(&self, r: u8) -> bool {
        self.busy[r as usize]
    }

    pub fn reserve(&mut self, r: u8) {
        self.busy[r as usize] = true;
    }

    pub fn clear(&mut self, r: u8) {
        self.busy[r as usize] = false;
    }
}

/// A one-deep forwarding latch publishing the most recently computed
/// destination of a single stage. Reset at the start of each cycle's
/// producing stage so there is no cross-cycle leakage (spec §9 redesign
/// note; the original C reference never reset these).
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardLatch {
    slot: Option<(u8, i64)>,
}

impl ForwardLatch {
    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn publish(&mut self, reg: u8, value: i64) {
        self.slot = Some((reg, value));
    }

    /// Value published for `reg`, if this latch currently holds one.
    pub fn lookup(&self, reg: u8) -> Option<i64> {
        self.slot.and_then(|(r, v)| (r == reg).then_some(v))
    }
}

/// The two forwarding buffers consumed by decode: the execute-stage result
/// and the memory-stage result, each published fresh every cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardingBuffers {
    pub exec: ForwardLatch,
    pub mem: ForwardLatch,
}

impl ForwardingBuffers {
    /// Operand source resolution per spec §4.2 (a)-(b): execute-stage
    /// forward takes priority over memory-stage forward.
    pub fn resolve(&self, reg: u8) -> Option<i64> {
        self.exec.lookup(reg).or_else(|| self.mem.lookup(reg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_forward_wins_over_mem_forward() {
        let mut fw = ForwardingBuffers::default();
        fw.exec.publish(3, 10);
        fw.mem.publish(3, 99);
        assert_eq!(fw.resolve(3), Some(10));
    }

    #[test]
    fn no_forward_is_none() {
        let fw = ForwardingBuffers::default();
        assert_eq!(fw.resolve(5), None);
    }

    #[test]
    fn reservation_round_trips() {
        let mut rv = ReservationVector::default();
        assert!(!rv.is_busy(2));
        rv.reserve(2);
        assert!(rv.is_busy(2));
        rv.clear(2);
        assert!(!rv.is_busy(2));
    }
}
