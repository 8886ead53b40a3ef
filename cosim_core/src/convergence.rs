//! Local and global convergence bookkeeping for one participant.
//!
//! The global predicate is an AND over the local flag and the last flag
//! received from every tracked peer. Peers' flags are only ever learned
//! from their published samples; nothing is shared by reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-instant convergence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceState {
    pub local_flag: bool,
    pub iteration_count: u32,
    pub max_iterations: u32,
}

/// What the tracker concludes about the current instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Local flag and every peer flag are set.
    Converged,
    /// The iteration cap is spent; treat as converged.
    CapReached,
    /// Keep iterating.
    Continue,
}

impl Verdict {
    /// True for both natural and forced convergence.
    pub fn may_advance(self) -> bool {
        !matches!(self, Verdict::Continue)
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    state: ConvergenceState,

    /// `|x − x_prev| ≤ tolerance` sets the local flag.
    tolerance: f64,

    /// Previous iterate. Survives instant boundaries.
    previous_x: Option<f64>,

    peer_flags: BTreeMap<String, bool>,
}

impl ConvergenceTracker {
    pub fn new(tolerance: f64, max_iterations: u32) -> Self {
        Self {
            state: ConvergenceState {
                local_flag: false,
                iteration_count: 0,
                max_iterations,
            },
            tolerance,
            previous_x: None,
            peer_flags: BTreeMap::new(),
        }
    }

    /// Adds a peer to the AND-reduction. Its flag starts unset.
    pub fn track_peer(&mut self, peer: impl Into<String>) {
        self.peer_flags.insert(peer.into(), false);
    }

    /// Resets flags and counters on entry to a new instant.
    pub fn begin_instant(&mut self) {
        self.state.local_flag = false;
        self.state.iteration_count = 0;
        for flag in self.peer_flags.values_mut() {
            *flag = false;
        }
    }

    /// Records a flag freshly received from a peer.
    pub fn observe_peer(&mut self, peer: &str, converged: bool) {
        if let Some(flag) = self.peer_flags.get_mut(peer) {
            *flag = converged;
        }
    }

    /// Records a new local iterate and updates the local flag.
    ///
    /// # Returns
    /// The new local flag.
    pub fn record_iterate(&mut self, x: f64) -> bool {
        let local = self
            .previous_x
            .map(|prev| (x - prev).abs() <= self.tolerance)
            .unwrap_or(false);
        self.previous_x = Some(x);
        self.state.local_flag = local;
        self.state.iteration_count += 1;
        local
    }

    /// AND over the local flag and every tracked peer's flag.
    pub fn global_flag(&self) -> bool {
        self.state.local_flag && self.peer_flags.values().all(|&f| f)
    }

    pub fn cap_reached(&self) -> bool {
        self.state.iteration_count >= self.state.max_iterations
    }

    pub fn verdict(&self) -> Verdict {
        if self.global_flag() {
            Verdict::Converged
        } else if self.cap_reached() {
            Verdict::CapReached
        } else {
            Verdict::Continue
        }
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    pub fn peer_flag(&self, peer: &str) -> Option<bool> {
        self.peer_flags.get(peer).copied()
    }
}
