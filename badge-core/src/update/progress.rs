//! Wait-free progress cell shared between the update worker and readers

use std::sync::atomic::{AtomicU16, Ordering};

use badge_proto::{UpdateStage, UpdateState};

/// Observed (stage, percent) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: UpdateStage,
    pub percent: u8,
}

impl Progress {
    /// Single 0..=100 figure across all stages
    pub fn overall(&self, state: UpdateState) -> u8 {
        if state == UpdateState::Committed {
            return 100;
        }
        let third = self.percent.min(100) / 3;
        match self.stage {
            UpdateStage::Download => third,
            UpdateStage::Verify => 33 + third,
            UpdateStage::Apply if self.percent >= 100 => 100,
            UpdateStage::Apply => 64 + third,
        }
    }
}

/// Stage and percent packed in one word, so readers never see a torn pair.
///
/// Only the update worker writes.
#[derive(Debug, Default)]
pub struct ProgressCell(AtomicU16);

impl ProgressCell {
    pub fn set(&self, stage: UpdateStage, percent: u8) {
        let packed = ((stage as u16) << 8) | percent.min(100) as u16;
        self.0.store(packed, Ordering::Release);
    }

    pub fn get(&self) -> Progress {
        let packed = self.0.load(Ordering::Acquire);
        let stage = UpdateStage::try_from((packed >> 8) as u8).unwrap_or(UpdateStage::Download);
        Progress { stage, percent: packed as u8 }
    }
}

/// Percent of `done` over `total`, without overflow
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as u128 * 100) / total as u128).min(100) as u8
}
