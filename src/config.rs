//! Build-time heap geometry and per-heaplet tuning.
//!
//! The geometry constants are fixed at compile time: every tagged pointer can
//! be masked down to its block header only because `BLOCK_SIZE` is a power of
//! two and every block is naturally aligned. Tuning knobs that do not affect
//! pointer masking live in [`HeapletConfig`] and may differ per heaplet.

/// Size of a machine word in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Size of a heap block in bytes. Power of two, equal to the page size so the
/// region allocator hands out naturally aligned blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Minimum object size in words. Power of two, at least two words so a
/// broken-heart header plus forwarding pointer always fit in a dead object.
pub const MIN_OBJECT_SIZE_WORDS: usize = 2;

/// Minimum object size (and object alignment) in bytes.
pub const MIN_OBJECT_SIZE: usize = MIN_OBJECT_SIZE_WORDS * WORD_SIZE;

/// Reserved header pattern written over evacuated objects. No client shape may
/// use this value as a type code; [`crate::ShapeTable`] rejects shapes whose
/// discriminator accepts it.
pub const BROKEN_HEART_TYPE_CODE: usize = 0xB10C_4EA7;

/// Number of ratios kept in each rolling survival window.
pub const SURVIVAL_WINDOW: usize = 8;

const _: () = {
    assert!(BLOCK_SIZE.is_power_of_two());
    assert!(MIN_OBJECT_SIZE_WORDS.is_power_of_two());
    assert!(MIN_OBJECT_SIZE_WORDS >= 2 && MIN_OBJECT_SIZE_WORDS < 32);
    // A block must hold its rounded header plus at least one object.
    assert!(BLOCK_SIZE >= 2 * MIN_OBJECT_SIZE + 64);
};

/// Per-heaplet tuning parameters.
///
/// All byte quantities are rounded up to whole-block multiples when applied.
/// The defaults match a small interpreter workload; embedders with unusual
/// allocation profiles should start from `HeapletConfig::default()` and adjust.
#[derive(Debug, Clone)]
pub struct HeapletConfig {
    /// Number of non-nursery young ageing steps (N >= 0). Objects survive
    /// `ageing_steps + 1` minor collections before reaching the old generation.
    pub ageing_steps: usize,
    /// Lower clamp for the nursery threshold, in bytes.
    pub nursery_minimum: usize,
    /// Upper clamp for the nursery threshold, in bytes.
    pub nursery_maximum: usize,
    /// Initial nursery threshold, in bytes.
    pub nursery_initial: usize,
    /// Lower clamp for the oldspace threshold, in bytes.
    pub oldspace_minimum: usize,
    /// Upper clamp for the oldspace threshold, in bytes.
    pub oldspace_maximum: usize,
    /// Initial oldspace threshold, in bytes.
    pub oldspace_initial: usize,
    /// Below this weighted minor survival rate the nursery shrinks.
    pub survival_rate_low: f64,
    /// Above this weighted minor survival rate the nursery grows.
    pub survival_rate_high: f64,
    /// Target survival rate used to derive the oldspace threshold after a
    /// major collection.
    pub survival_rate_target: f64,
    /// Nursery growth factor, > 1.
    pub nursery_growth_ratio: f64,
    /// Nursery shrinkage factor, in (0, 1).
    pub nursery_shrinkage_ratio: f64,
    /// Weight of the most recent window entry, in [0.5, 1.0).
    pub recent_bias: f64,
    /// Capacity of the sequential store buffer, in words. Its byte size is
    /// deducted from the nursery budget.
    pub ssb_capacity_words: usize,
}

impl Default for HeapletConfig {
    fn default() -> Self {
        Self {
            ageing_steps: 1,
            nursery_minimum: 4 * BLOCK_SIZE,
            nursery_maximum: 1024 * BLOCK_SIZE,
            nursery_initial: 16 * BLOCK_SIZE,
            oldspace_minimum: 32 * BLOCK_SIZE,
            oldspace_maximum: 8192 * BLOCK_SIZE,
            oldspace_initial: 64 * BLOCK_SIZE,
            survival_rate_low: 0.1,
            survival_rate_high: 0.4,
            survival_rate_target: 0.5,
            nursery_growth_ratio: 2.0,
            nursery_shrinkage_ratio: 0.5,
            recent_bias: 0.5,
            ssb_capacity_words: 256,
        }
    }
}

impl HeapletConfig {
    /// Panics unless the configuration is internally consistent. Invoked on
    /// heaplet creation; a bad configuration is a client contract violation.
    pub(crate) fn validate(&self) {
        assert!(
            self.nursery_minimum >= BLOCK_SIZE
                && self.nursery_minimum <= self.nursery_initial
                && self.nursery_initial <= self.nursery_maximum,
            "nursery bounds must satisfy minimum <= initial <= maximum"
        );
        assert!(
            self.oldspace_minimum <= self.oldspace_initial
                && self.oldspace_initial <= self.oldspace_maximum,
            "oldspace bounds must satisfy minimum <= initial <= maximum"
        );
        assert!(
            self.survival_rate_low < self.survival_rate_high,
            "survival_rate_low must be below survival_rate_high"
        );
        assert!(
            self.survival_rate_target > 0.0 && self.survival_rate_target <= 1.0,
            "survival_rate_target must be in (0, 1]"
        );
        assert!(
            self.nursery_growth_ratio > 1.0,
            "nursery_growth_ratio must exceed 1"
        );
        assert!(
            self.nursery_shrinkage_ratio > 0.0 && self.nursery_shrinkage_ratio < 1.0,
            "nursery_shrinkage_ratio must be in (0, 1)"
        );
        assert!(
            (0.5..1.0).contains(&self.recent_bias),
            "recent_bias must be in [0.5, 1.0)"
        );
        assert!(
            self.ssb_capacity_words > 0
                && self.ssb_capacity_words * WORD_SIZE < self.nursery_minimum,
            "SSB must be smaller than the minimum nursery"
        );
    }
}
