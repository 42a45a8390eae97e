//! Primal/Dual containers & caches (§4.I, §3): the nominal/cached/optimised
//! triplet and its accept/revert lifecycle.
//!
//! The original source swaps `nominal` and `cached` at the top of each
//! iteration because its search runs first and overwrites `nominal` in
//! place, so the swap's only job is to free up `cached` as scratch space
//! for a possible revert. This port's search instead runs after the
//! backward pass and returns a candidate iterate that the caller applies
//! explicitly, so `cached` is kept in sync inside `accept` itself: it
//! always holds the iterate that was nominal immediately before the most
//! recent accept, which is exactly what a revert needs to restore.

use crate::model::{DualSolution, PerformanceIndex, PrimalSolution};

/// One (primal, dual, metrics) bundle; a single owner, never aliased.
#[derive(Clone)]
pub struct Iterate {
    pub primal: PrimalSolution,
    pub dual: DualSolution,
    pub performance: PerformanceIndex,
}

/// The three triplets the DDP loop mutates (§3, §4.I). `optimised` is
/// touched only by the final search of a top-level solve.
pub struct Containers {
    pub nominal: Iterate,
    pub cached: Iterate,
    pub optimised: Iterate,
    history: Vec<PerformanceIndex>,
}

impl Containers {
    pub fn new(initial: Iterate) -> Self {
        Self {
            nominal: initial.clone(),
            cached: initial.clone(),
            optimised: initial,
            history: Vec::new(),
        }
    }

    /// §4.I "On search success: nominal holds the new iterate, cached holds
    /// the previous one." The previous nominal becomes the revert point for
    /// the next iteration rather than being dropped.
    pub fn accept(&mut self, iterate: Iterate) {
        self.history.push(iterate.performance.clone());
        self.cached = std::mem::replace(&mut self.nominal, iterate);
    }

    /// §4.I "On search failure: copy cached -> nominal; restore
    /// performance_index <- history.last()."
    pub fn revert(&mut self) {
        self.nominal = self.cached.clone();
        if let Some(&last) = self.history.last() {
            self.nominal.performance = last;
        }
    }

    pub fn commit_optimised(&mut self) {
        self.optimised = self.nominal.clone();
    }

    pub fn history(&self) -> &[PerformanceIndex] {
        &self.history
    }

    /// Whether `nominal` and `cached` currently hold bit-identical primal
    /// solutions (§8 scenario 5, "failed step revert").
    pub fn nominal_matches_cached(&self) -> bool {
        self.nominal.primal.times == self.cached.primal.times
            && self
                .nominal
                .primal
                .states
                .iter()
                .zip(&self.cached.primal.states)
                .all(|(a, b)| a == b)
            && self
                .nominal
                .primal
                .inputs
                .iter()
                .zip(&self.cached.primal.inputs)
                .all(|(a, b)| a == b)
    }
}
