use std::time::Instant;

use crate::loopback::Shot;

/// Tally of one delay sweep.
#[derive(Debug)]
pub struct SweepStats {
    pub matched: u64,
    pub mismatched: u64,
    pub silent: u64,
    pub faults: u64,
    t0: Instant,
}

impl SweepStats {
    pub fn new() -> Self {
        Self {
            matched: 0,
            mismatched: 0,
            silent: 0,
            faults: 0,
            t0: Instant::now(),
        }
    }

    pub fn record(&mut self, shot: &Shot) {
        match shot {
            Shot::Match => self.matched += 1,
            Shot::Mismatch => self.mismatched += 1,
            Shot::NoFrame => self.silent += 1,
            Shot::Fault(_) => self.faults += 1,
        }
    }

    pub fn pairs(&self) -> u64 {
        self.matched + self.mismatched + self.silent + self.faults
    }

    pub fn summary(&self) {
        eprintln!(
            "[sweep] pairs={} ok={} bad={} silent={} faults={} over {:.1}s",
            self.pairs(),
            self.matched,
            self.mismatched,
            self.silent,
            self.faults,
            self.t0.elapsed().as_secs_f64()
        );
    }
}
