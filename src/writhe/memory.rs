//! # Peak-memory model
//!
//! `peak_gb(n_pairs, n_samples) = (n_pairs * gb_per_pair_sample + gb_per_sample) * n_samples`
//!
//! The default constants were fitted on one accelerator class and are a rule of thumb only;
//! callers keep a safety margin (see [`crate::writhe::planner::PlannerConfig`]). Load a
//! recalibrated model with [`MemoryCostModel::from_json`] for other devices or precisions.

use serde::{Deserialize, Serialize};

use crate::writhe::WritheError;
#[cfg(feature = "python")]
use pyo3::prelude::*;

pub const DEFAULT_GB_PER_PAIR_SAMPLE: f64 = 2.01708461e-07;
pub const DEFAULT_GB_PER_SAMPLE: f64 = 5.93515514e-08;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryCostModel {
    pub gb_per_pair_sample: f64,
    pub gb_per_sample: f64,
}

impl Default for MemoryCostModel {
    fn default() -> Self {
        Self {
            gb_per_pair_sample: DEFAULT_GB_PER_PAIR_SAMPLE,
            gb_per_sample: DEFAULT_GB_PER_SAMPLE,
        }
    }
}

impl MemoryCostModel {
    pub fn new(gb_per_pair_sample: f64, gb_per_sample: f64) -> Result<Self, WritheError> {
        if !(gb_per_pair_sample.is_finite() && gb_per_pair_sample > 0.0) {
            return Err(WritheError::InvalidArgument(format!(
                "gb_per_pair_sample must be finite and > 0, got {}",
                gb_per_pair_sample
            )));
        }
        if !(gb_per_sample.is_finite() && gb_per_sample >= 0.0) {
            return Err(WritheError::InvalidArgument(format!(
                "gb_per_sample must be finite and >= 0, got {}",
                gb_per_sample
            )));
        }
        Ok(Self {
            gb_per_pair_sample,
            gb_per_sample,
        })
    }

    /// Parses `{"gb_per_pair_sample": .., "gb_per_sample": ..}` and validates it.
    pub fn from_json(text: &str) -> Result<Self, WritheError> {
        let raw: MemoryCostModel = serde_json::from_str(text)
            .map_err(|e| WritheError::InvalidArgument(format!("memory model json: {}", e)))?;
        Self::new(raw.gb_per_pair_sample, raw.gb_per_sample)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    #[inline]
    pub fn estimate_peak_gb(&self, n_pairs: usize, n_samples: usize) -> f64 {
        let s = n_samples as f64;
        (n_pairs as f64) * s * self.gb_per_pair_sample + s * self.gb_per_sample
    }

    /// Largest pair count whose estimate fits `budget_gb`; may be zero or negative.
    ///
    /// Tight: `estimate(k) <= budget` and `estimate(k + 1) > budget` for the returned `k`
    /// whenever `k >= 0`.
    pub fn max_pairs(&self, budget_gb: f64, n_samples: usize) -> i64 {
        if n_samples == 0 {
            return i64::MAX;
        }
        if !budget_gb.is_finite() {
            return if budget_gb > 0.0 { i64::MAX } else { i64::MIN };
        }
        let raw = ((budget_gb / n_samples as f64) - self.gb_per_sample) / self.gb_per_pair_sample;
        if raw >= i64::MAX as f64 {
            return i64::MAX;
        }
        let mut k = raw.floor() as i64;
        if k < 0 {
            return k;
        }
        // floor() of the closed form can land one off after rounding
        while k > 0 && self.estimate_peak_gb(k as usize, n_samples) > budget_gb {
            k -= 1;
        }
        while self.estimate_peak_gb(k as usize + 1, n_samples) <= budget_gb {
            k += 1;
        }
        if k == 0 && self.estimate_peak_gb(0, n_samples) > budget_gb {
            return -1;
        }
        k
    }
}

/// Estimated peak GB of a batched evaluation with the default constants.
#[cfg(feature = "python")]
#[pyfunction(name = "peak_mem_writhe")]
#[pyo3(signature = (n_pairs, n_samples))]
pub fn peak_mem_writhe_py(n_pairs: usize, n_samples: usize) -> f64 {
    MemoryCostModel::default().estimate_peak_gb(n_pairs, n_samples)
}
