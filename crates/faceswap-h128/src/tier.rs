//! Capacity-driven tier and batch-size selection.
//!
//! The available accelerator memory (GB) picks one of two architecture
//! tiers and an upper bound for the batch size. Selection is a pure table
//! lookup and never fails: capacities outside the table clamp to the
//! nearest bracket.

use serde::{Deserialize, Serialize};

use faceswap_core::Platform;

/// Capacity (GB) at which the wider/deeper profile is selected
pub const HIGH_TIER_MIN_CAPACITY: f64 = 5.0;

/// Batch size used when no accelerator is present
pub const CPU_ONLY_BATCH_SIZE: usize = 2;

/// `(capacity upper bound, batch size)` brackets, ascending
pub const BATCH_TABLE: &[(f64, usize)] = &[
    (2.5, 2),
    (3.0, 2),
    (4.0, 4),
    (5.0, 8),
    (6.0, 8),
    (7.0, 16),
    (8.0, 16),
    (9.0, 24),
    (10.0, 24),
    (11.0, 32),
    (12.0, 32),
    (13.0, 48),
];

/// Discrete architecture-capacity bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Low,
    High,
}

impl Tier {
    pub fn from_capacity(capacity_gb: f64) -> Self {
        if capacity_gb >= HIGH_TIER_MIN_CAPACITY {
            Tier::High
        } else {
            Tier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::High => "high",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of tier selection, fixed for the lifetime of a built model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSelection {
    pub tier: Tier,
    /// Largest batch the selected tier may train with
    pub batch_size: usize,
}

impl TierSelection {
    /// Resolve a caller-requested batch size against the table bound.
    pub fn effective_batch_size(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(self.batch_size),
            _ => self.batch_size,
        }
    }
}

/// Map a capacity value to its tier and batch-size bound.
pub fn select(capacity_gb: f64, platform: Platform) -> TierSelection {
    let tier = Tier::from_capacity(capacity_gb);
    let batch_size = match platform {
        Platform::CpuOnly => CPU_ONLY_BATCH_SIZE,
        Platform::Accelerator => batch_size_for(capacity_gb),
    };

    TierSelection { tier, batch_size }
}

fn batch_size_for(capacity_gb: f64) -> usize {
    // NaN has no bracket; treat it as the smallest device
    if capacity_gb.is_nan() {
        return BATCH_TABLE[0].1;
    }

    BATCH_TABLE
        .iter()
        .find(|(bound, _)| capacity_gb <= *bound)
        .or_else(|| BATCH_TABLE.last())
        .map(|&(_, batch)| batch)
        .unwrap_or(CPU_ONLY_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_entries() {
        for &(capacity, batch) in BATCH_TABLE {
            let selection = select(capacity, Platform::Accelerator);
            assert_eq!(selection.batch_size, batch, "capacity {capacity}");
            assert_eq!(selection.tier, Tier::from_capacity(capacity));
        }
    }

    #[test]
    fn test_tier_boundary() {
        assert_eq!(select(4.99, Platform::Accelerator).tier, Tier::Low);
        assert_eq!(select(5.0, Platform::Accelerator).tier, Tier::High);
        assert_eq!(select(24.0, Platform::Accelerator).tier, Tier::High);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(select(0.5, Platform::Accelerator).batch_size, 2);
        assert_eq!(select(3.5, Platform::Accelerator).batch_size, 4);
        assert_eq!(select(12.5, Platform::Accelerator).batch_size, 48);
        assert_eq!(select(80.0, Platform::Accelerator).batch_size, 48);
        assert_eq!(select(f64::INFINITY, Platform::Accelerator).batch_size, 48);
        assert_eq!(select(f64::NAN, Platform::Accelerator).batch_size, 2);
    }

    #[test]
    fn test_monotonic() {
        let mut previous = 0;
        for step in 0..=300 {
            let capacity = step as f64 * 0.05;
            let batch = select(capacity, Platform::Accelerator).batch_size;
            assert!(batch >= previous, "batch decreased at capacity {capacity}");
            previous = batch;
        }
    }

    #[test]
    fn test_cpu_only_flavor() {
        let selection = select(8.0, Platform::CpuOnly);
        assert_eq!(selection.batch_size, CPU_ONLY_BATCH_SIZE);
        assert_eq!(selection.tier, Tier::High);
    }

    #[test]
    fn test_low_end_selection() {
        let selection = select(3.0, Platform::Accelerator);
        assert_eq!(selection.tier, Tier::Low);
        assert_eq!(selection.batch_size, 2);
    }

    #[test]
    fn test_effective_batch_size() {
        let selection = select(7.0, Platform::Accelerator);
        assert_eq!(selection.effective_batch_size(None), 16);
        assert_eq!(selection.effective_batch_size(Some(4)), 4);
        assert_eq!(selection.effective_batch_size(Some(64)), 16);
        assert_eq!(selection.effective_batch_size(Some(0)), 16);
    }
}
