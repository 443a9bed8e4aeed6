//! Current-slot estimation from recent slot notifications.
//!
//! Slot notifications arrive out of order and occasionally far in the
//! future (misconfigured or malicious validators broadcast invalid blocks),
//! so the estimate is derived from a bounded window of recent observations
//! rather than the latest value alone.

use std::collections::VecDeque;

use super::{Slot, MAX_SLOT_SKIP_DISTANCE, RECENT_SLOTS_CAPACITY};
use crate::errors::{Result, TpuSenderError};

/// Sliding window of recently observed slots with a current-slot estimate.
///
/// The median of the window resists stalled or runaway readings; the
/// forward offset projects the median toward the freshest entries; the
/// skip bound keeps a single far-future reading from being trusted
/// outright.
#[derive(Debug, Default)]
pub struct SlotEstimator {
    recent_slots: VecDeque<Slot>,
}

impl SlotEstimator {
    /// Creates an estimator seeded with a freshly queried current slot.
    pub fn new(current_slot: Slot) -> Self {
        let mut estimator = Self::default();
        estimator.record(current_slot);
        estimator
    }

    /// Records an observed slot, evicting the oldest observations once the
    /// window is full. Input values carry no ordering constraint.
    pub fn record(&mut self, slot: Slot) {
        self.recent_slots.push_back(slot);

        if self.recent_slots.len() > RECENT_SLOTS_CAPACITY {
            let excess = self.recent_slots.len() - RECENT_SLOTS_CAPACITY;
            self.recent_slots.drain(..excess);
        }
    }

    /// Estimates the current slot from the recorded window.
    ///
    /// Fails with [`TpuSenderError::NoRecentSlots`] if no slot was ever
    /// recorded. Otherwise returns the largest recorded slot that does not
    /// overshoot the median-based projection by more than
    /// [`MAX_SLOT_SKIP_DISTANCE`].
    pub fn estimate(&self) -> Result<Slot> {
        if self.recent_slots.is_empty() {
            return Err(TpuSenderError::NoRecentSlots);
        }

        let mut sorted: Vec<Slot> = self.recent_slots.iter().copied().collect();
        sorted.sort_unstable();

        let max_index = sorted.len() - 1;
        let median_index = max_index / 2;
        let median_slot = sorted[median_index];
        let expected_current = median_slot + (max_index - median_index) as u64;
        let max_reasonable = expected_current + MAX_SLOT_SKIP_DISTANCE;

        let index = sorted
            .iter()
            .rposition(|slot| *slot <= max_reasonable)
            .unwrap_or(median_index);

        Ok(sorted[index])
    }
}
