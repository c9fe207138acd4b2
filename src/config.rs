//! Run constraints and engine tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizeError, Result};

pub const WASTE_THRESHOLD_RANGE: (f64, f64) = (100.0, 2000.0);
pub const TARGET_LOSS_RATE_RANGE: (f64, f64) = (0.0, 20.0);
pub const TIME_LIMIT_RANGE: (u64, u64) = (1, 300);
pub const MAX_WELDING_SEGMENTS: u32 = 9;

/// User-facing constraints for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    /// Leftovers shorter than this (mm) are scrap; longer ones are reusable.
    pub waste_threshold: f64,
    /// Advisory loss-rate goal in percent. Never used to reject a plan.
    pub target_loss_rate: f64,
    /// Wall-clock budget in seconds.
    pub time_limit: u64,
    /// Maximum welds per produced piece; 0 disables welding.
    pub max_welding_segments: u32,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            waste_threshold: 100.0,
            target_loss_rate: 5.0,
            time_limit: 30,
            max_welding_segments: 1,
        }
    }
}

impl Constraints {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_limit)
    }

    /// Every out-of-range value, in field order.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let (lo, hi) = WASTE_THRESHOLD_RANGE;
        if !(lo..=hi).contains(&self.waste_threshold) {
            errors.push(format!(
                "wasteThreshold must be between {lo} and {hi} mm, got {}",
                self.waste_threshold
            ));
        }
        let (lo, hi) = TARGET_LOSS_RATE_RANGE;
        if !(lo..=hi).contains(&self.target_loss_rate) {
            errors.push(format!(
                "targetLossRate must be between {lo} and {hi} %, got {}",
                self.target_loss_rate
            ));
        }
        let (lo, hi) = TIME_LIMIT_RANGE;
        if !(lo..=hi).contains(&self.time_limit) {
            errors.push(format!(
                "timeLimit must be between {lo} and {hi} s, got {}",
                self.time_limit
            ));
        }
        if self.max_welding_segments > MAX_WELDING_SEGMENTS {
            errors.push(format!(
                "maxWeldingSegments must be between 0 and {MAX_WELDING_SEGMENTS}, got {}",
                self.max_welding_segments
            ));
        }
        errors
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.violations();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OptimizeError::invalid(errors.join("; ")))
        }
    }
}

/// Engine tuning. None of these change what a valid plan is, only how hard
/// the search looks for one.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Honour per-length `available` counts on module bars.
    pub bounded_supply: bool,
    /// Node cap for one pattern enumeration before falling back to greedy.
    pub max_enumeration_nodes: usize,
    /// Patterns kept per stock length.
    pub max_patterns_per_stock: usize,
    /// Welded composites considered per step.
    pub max_composites: usize,
    /// Minimum time between progress samples.
    pub progress_interval: Duration,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            bounded_supply: false,
            max_enumeration_nodes: 20_000,
            max_patterns_per_stock: 4,
            max_composites: 32,
            progress_interval: Duration::from_millis(100),
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounded_supply(mut self, bounded: bool) -> Self {
        self.bounded_supply = bounded;
        self
    }

    pub fn with_max_enumeration_nodes(mut self, nodes: usize) -> Self {
        self.max_enumeration_nodes = nodes;
        self
    }

    pub fn with_max_patterns_per_stock(mut self, patterns: usize) -> Self {
        self.max_patterns_per_stock = patterns;
        self
    }

    pub fn with_max_composites(mut self, composites: usize) -> Self {
        self.max_composites = composites;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_enumeration_nodes == 0 {
            return Err(OptimizeError::invalid("max_enumeration_nodes must be positive"));
        }
        if self.max_patterns_per_stock == 0 {
            return Err(OptimizeError::invalid("max_patterns_per_stock must be positive"));
        }
        if self.max_composites == 0 {
            return Err(OptimizeError::invalid("max_composites must be positive"));
        }
        Ok(())
    }
}
