use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Merge cycles a field may disagree with its peer before it is overwritten.
pub const DEFAULT_TOLERANCE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftVerdict {
    InSync,
    Drifting(u32),
    /// The tolerance was exceeded; the caller must replace its copy with the peer's.
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftCounter {
    tolerance: u32,
    frames_out_of_sync: u32,
}

impl Default for DriftCounter {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl DriftCounter {
    pub fn new(tolerance: u32) -> Self {
        Self {
            tolerance,
            frames_out_of_sync: 0,
        }
    }

    pub fn tolerance(&self) -> u32 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: u32) {
        self.tolerance = tolerance;
    }

    pub fn frames_out_of_sync(&self) -> u32 {
        self.frames_out_of_sync
    }

    pub fn is_drifting(&self) -> bool {
        self.frames_out_of_sync > 0
    }

    pub fn reset(&mut self) {
        self.frames_out_of_sync = 0;
    }

    /// Feeds one comparison result into the counter.
    ///
    /// A zero distance resets the counter. A mismatch increments it, and once it
    /// exceeds the tolerance the counter resets and `Repair` is returned.
    pub fn observe(&mut self, distance: usize) -> DriftVerdict {
        if distance == 0 {
            self.frames_out_of_sync = 0;
            return DriftVerdict::InSync;
        }

        self.frames_out_of_sync = self.frames_out_of_sync.saturating_add(1);

        if self.frames_out_of_sync > self.tolerance {
            self.frames_out_of_sync = 0;
            DriftVerdict::Repair
        } else {
            DriftVerdict::Drifting(self.frames_out_of_sync)
        }
    }
}

/// Aggregates too coarse to wrap field by field but still kept consistent with a peer.
pub trait Reconcilable {
    fn diff_count(&self, peer: &Self) -> usize;
    fn replace_with(&mut self, peer: &Self);
}

pub(crate) fn positional_diff<'a, T: PartialEq + 'a>(
    local: impl ExactSizeIterator<Item = &'a T>,
    peer: impl ExactSizeIterator<Item = &'a T>,
) -> usize {
    let length_gap = local.len().abs_diff(peer.len());
    let mismatched = local.zip(peer).filter(|(a, b)| a != b).count();
    mismatched + length_gap
}

impl<T: PartialEq + Clone> Reconcilable for Vec<T> {
    fn diff_count(&self, peer: &Self) -> usize {
        positional_diff(self.iter(), peer.iter())
    }

    fn replace_with(&mut self, peer: &Self) {
        self.clone_from(peer);
    }
}

impl<T: PartialEq + Clone> Reconcilable for VecDeque<T> {
    fn diff_count(&self, peer: &Self) -> usize {
        positional_diff(self.iter(), peer.iter())
    }

    fn replace_with(&mut self, peer: &Self) {
        self.clone_from(peer);
    }
}

/// An aggregate paired with its own drift counter.
#[derive(Debug, Clone)]
pub struct ConsistencyRepair<A> {
    local: A,
    drift: DriftCounter,
    repairs: u64,
}

impl<A: Reconcilable> ConsistencyRepair<A> {
    pub fn new(local: A, tolerance: u32) -> Self {
        Self {
            local,
            drift: DriftCounter::new(tolerance),
            repairs: 0,
        }
    }

    pub fn local(&self) -> &A {
        &self.local
    }

    /// Local edits do not touch the drift counter.
    pub fn local_mut(&mut self) -> &mut A {
        &mut self.local
    }

    pub fn drift(&self) -> &DriftCounter {
        &self.drift
    }

    pub fn repairs(&self) -> u64 {
        self.repairs
    }

    pub fn into_inner(self) -> A {
        self.local
    }

    pub fn reconcile(&mut self, peer: &A) -> DriftVerdict {
        let distance = self.local.diff_count(peer);
        let verdict = self.drift.observe(distance);

        match verdict {
            DriftVerdict::Repair => {
                self.local.replace_with(peer);
                self.repairs += 1;
                log::debug!(
                    "aggregate drifted past tolerance {} ({} differences), replaced with peer copy",
                    self.drift.tolerance(),
                    distance
                );
            }
            DriftVerdict::Drifting(frames) => {
                log::trace!("aggregate drifting for {} frames ({} differences)", frames, distance);
            }
            DriftVerdict::InSync => {}
        }

        verdict
    }
}
