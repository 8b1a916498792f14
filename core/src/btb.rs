//! Branch target buffer + 2-bit saturating predictor (variant 2).
//!
//! A small FIFO-replaced, linearly-searched buffer is sufficient here
//! because the modelled table is tiny (spec §9: "acceptable because size
//! is 4").

/// `00` strong-not-taken .. `11` strong-taken, saturating both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome(u8);

impl Outcome {
    pub const STRONG_NOT_TAKEN: Outcome = Outcome(0);
    pub const WEAK_NOT_TAKEN: Outcome = Outcome(1);
    pub const WEAK_TAKEN: Outcome = Outcome(2);
    pub const STRONG_TAKEN: Outcome = Outcome(3);

    pub fn predicts_taken(&self) -> bool {
        self.0 >= Self::WEAK_TAKEN.0
    }

    pub fn increment(self) -> Outcome {
        Outcome(self.0.saturating_add(1).min(3))
    }

    pub fn decrement(self) -> Outcome {
        Outcome(self.0.saturating_sub(1))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::WEAK_NOT_TAKEN
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BtbEntry {
    pub address: u32,
    pub calculated_address: u32,
    pub taken: bool,
    pub valid: bool,
    pub outcome: Outcome,
    pub resolved: bool,
}

impl Default for BtbEntry {
    fn default() -> Self {
        Self {
            address: 0,
            calculated_address: 0,
            taken: false,
            valid: false,
            outcome: Outcome::default(),
            resolved: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Btb {
    entries: Vec<BtbEntry>,
    head: usize,
}

impl Btb {
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![BtbEntry::default(); size.max(1)],
            head: 0,
        }
    }

    fn find(&self, address: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.valid && e.address == address)
    }

    /// Looked up at fetch time. `Some(target)` means "predict taken, redirect
    /// to `target`"; `None` means "predict not-taken" (including a BTB miss).
    pub fn predict(&self, address: u32) -> Option<u32> {
        let idx = self.find(address)?;
        let entry = &self.entries[idx];
        entry.outcome.predicts_taken().then_some(entry.calculated_address)
    }

    /// Allocate a fresh entry for `address` on a fetch-time miss, FIFO
    /// replacing the oldest entry.
    pub fn insert_on_miss(&mut self, address: u32) {
        if self.find(address).is_some() {
            return;
        }
        self.entries[self.head] = BtbEntry {
            address,
            calculated_address: address,
            taken: false,
            valid: true,
            outcome: Outcome::default(),
            resolved: false,
        };
        self.head = (self.head + 1) % self.entries.len();
    }

    /// Train on resolution in execute: update the saturating counter and
    /// the cached target. Misprediction detection compares the fetch-time
    /// `StageLatch::predicted_target` against the resolved outcome directly
    /// (see `execute::resolve_branch`), rather than re-deriving it here.
    pub fn train(&mut self, address: u32, taken: bool, target: u32) {
        let idx = match self.find(address) {
            Some(idx) => idx,
            None => {
                self.insert_on_miss(address);
                self.find(address).expect("just inserted")
            }
        };
        let entry = &mut self.entries[idx];
        entry.outcome = if taken {
            entry.outcome.increment()
        } else {
            entry.outcome.decrement()
        };
        entry.taken = taken;
        entry.calculated_address = target;
        entry.resolved = true;
        entry.valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_saturates_both_ends() {
        let mut o = Outcome::STRONG_TAKEN;
        for _ in 0..5 {
            o = o.increment();
        }
        assert_eq!(o.bits(), 3);
        for _ in 0..10 {
            o = o.decrement();
        }
        assert_eq!(o.bits(), 0);
    }

    #[test]
    fn miss_predicts_not_taken() {
        let btb = Btb::new(4);
        assert_eq!(btb.predict(4000), None);
    }

    #[test]
    fn fifo_replacement_evicts_oldest() {
        let mut btb = Btb::new(2);
        btb.insert_on_miss(4000);
        btb.insert_on_miss(4004);
        btb.insert_on_miss(4008); // evicts 4000
        assert_eq!(btb.predict(4000), None);
        assert!(btb.find(4004).is_some());
    }

    #[test]
    fn training_taken_eventually_predicts_taken() {
        let mut btb = Btb::new(4);
        btb.insert_on_miss(4000);
        btb.train(4000, true, 4100);
        // one increment from weak-not-taken (1) -> weak-taken (2): predicts taken
        assert_eq!(btb.predict(4000), Some(4100));
    }

    #[test]
    fn training_not_taken_holds_at_floor() {
        let mut btb = Btb::new(4);
        btb.insert_on_miss(4000);
        btb.train(4000, false, 0);
        btb.train(4000, false, 0);
        assert_eq!(btb.predict(4000), None);
    }
}
