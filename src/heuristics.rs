//! Adaptive sizing.
//!
//! After each collection the heaplet re-derives its thresholds from recent
//! survival behavior: the nursery chases a survival-rate corridor, the
//! oldspace threshold chases the live set scaled by the target major survival
//! rate, and the unused pool is trimmed to the estimated working set.

use crate::config::{HeapletConfig, BLOCK_SIZE, SURVIVAL_WINDOW};

/// Ring buffer of the last `SURVIVAL_WINDOW` survival ratios for one
/// collection kind.
#[derive(Debug, Clone, Default)]
pub(crate) struct SurvivalWindow {
    ring: [f64; SURVIVAL_WINDOW],
    len: usize,
    next: usize,
}

impl SurvivalWindow {
    pub fn push(&mut self, ratio: f64) {
        self.ring[self.next] = ratio;
        self.next = (self.next + 1) % SURVIVAL_WINDOW;
        if self.len < SURVIVAL_WINDOW {
            self.len += 1;
        }
    }

    /// Weighted average: the most recent entry weighs `bias`, each older one
    /// `bias` of the remaining mass, and the oldest takes what is left.
    pub fn weighted_average(&self, bias: f64) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let mut total = 0.0;
        let mut remaining = 1.0;
        for age in 0..self.len {
            let index = (self.next + SURVIVAL_WINDOW - 1 - age) % SURVIVAL_WINDOW;
            let weight = if age == self.len - 1 { remaining } else { bias * remaining };
            total += weight * self.ring[index];
            remaining -= weight;
        }
        Some(total)
    }
}

pub(crate) fn round_up_to_block(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE
}

/// New nursery threshold after a minor collection.
pub(crate) fn resized_nursery_threshold(
    config: &HeapletConfig,
    window: &SurvivalWindow,
    current: usize,
) -> usize {
    let Some(survival) = window.weighted_average(config.recent_bias) else {
        return current;
    };
    let mut threshold = current as f64;
    if survival < config.survival_rate_low {
        threshold *= config.nursery_shrinkage_ratio;
    } else if survival > config.survival_rate_high {
        threshold *= config.nursery_growth_ratio;
    }
    let clamped = (threshold as usize)
        .clamp(config.nursery_minimum, config.nursery_maximum);
    round_up_to_block(clamped).min(round_up_to_block(config.nursery_maximum))
}

/// New oldspace threshold after a major collection: the live set scaled by
/// the target survival rate, clamped, and never below what is actually alive.
pub(crate) fn resized_oldspace_threshold(config: &HeapletConfig, alive_bytes: usize) -> usize {
    let good = (alive_bytes as f64 / config.survival_rate_target) as usize;
    let clamped = good.clamp(config.oldspace_minimum, config.oldspace_maximum);
    round_up_to_block(clamped.max(alive_bytes))
}

/// Working-set capacity the unused pool may retain after a major collection:
/// the oldspace threshold plus one nursery per young space (the nursery
/// itself, each ageing step and its reserve), minus what the spaces already
/// hold.
pub(crate) fn unused_pool_keep_bytes(
    config: &HeapletConfig,
    nursery_threshold: usize,
    oldspace_threshold: usize,
    currently_allocated: usize,
) -> usize {
    let working_set =
        oldspace_threshold + (1 + 2 * config.ageing_steps) * nursery_threshold;
    working_set.saturating_sub(currently_allocated)
}
