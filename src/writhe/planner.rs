//! # Batch planner
//!
//! Sizes segment-pair chunks so the estimated peak memory of one chunk fits the free memory
//! of a device minus a safety margin, and partitions `0..n_pairs` into consecutive ranges.
//!
//! ## Parameters
//! - **safety_margin_gb**: subtracted from the device's free memory (default: 2.0)
//! - **reduce_batch_size**: subtracted from the computed batch size (default: 0)
//! - **parallel_threshold**: multi-device dispatch needs `n_pairs >= threshold * batch` (default: 5)
//!
//! ## Errors
//! - **ResourceExhaustion**: the budget does not fit a single pair

use std::ops::Range;

use crate::writhe::device::MemoryInfo;
use crate::writhe::memory::MemoryCostModel;
use crate::writhe::WritheError;

pub const DEFAULT_SAFETY_MARGIN_GB: f64 = 2.0;
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerConfig {
    pub safety_margin_gb: f64,
    pub reduce_batch_size: usize,
    pub parallel_threshold: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            safety_margin_gb: DEFAULT_SAFETY_MARGIN_GB,
            reduce_batch_size: 0,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl PlannerConfig {
    /// Defaults overridden by `WRITHE_MEM_MARGIN_GB` and `WRITHE_REDUCE_BATCH` when set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("WRITHE_MEM_MARGIN_GB") {
            match v.trim().parse::<f64>() {
                Ok(m) if m.is_finite() && m >= 0.0 => cfg.safety_margin_gb = m,
                _ => log::warn!("ignoring WRITHE_MEM_MARGIN_GB={:?}", v),
            }
        }
        if let Ok(v) = std::env::var("WRITHE_REDUCE_BATCH") {
            match v.trim().parse::<usize>() {
                Ok(r) => cfg.reduce_batch_size = r,
                Err(_) => log::warn!("ignoring WRITHE_REDUCE_BATCH={:?}", v),
            }
        }
        cfg
    }

    pub fn with_reduce_batch_size(mut self, r: usize) -> Self {
        self.reduce_batch_size = r;
        self
    }

    pub fn with_safety_margin_gb(mut self, gb: f64) -> Self {
        self.safety_margin_gb = gb;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryBudget {
    /// Host execution; the cost model is not consulted.
    Unlimited,
    FreeGb(f64),
}

impl MemoryBudget {
    pub fn from_memory_info(info: Option<MemoryInfo>, safety_margin_gb: f64) -> Self {
        match info {
            None => MemoryBudget::Unlimited,
            Some(i) => MemoryBudget::FreeGb(i.free_gb() - safety_margin_gb),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub n_pairs: usize,
    pub chunks: Vec<Range<usize>>,
}

impl BatchPlan {
    fn split(n_pairs: usize, batch_size: usize) -> Self {
        let chunks = (0..n_pairs)
            .step_by(batch_size.max(1))
            .map(|lo| lo..(lo + batch_size).min(n_pairs))
            .collect();
        Self {
            batch_size,
            n_pairs,
            chunks,
        }
    }

    #[inline]
    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_single(&self) -> bool {
        self.chunks.len() <= 1
    }

    /// Enough work to spread across `n_devices`.
    pub fn is_parallel_worthy(&self, n_devices: usize, threshold: usize) -> bool {
        n_devices > 1
            && !self.is_single()
            && self.n_pairs >= threshold.saturating_mul(self.batch_size)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchPlanner {
    pub model: MemoryCostModel,
    pub config: PlannerConfig,
}

impl BatchPlanner {
    pub fn new(model: MemoryCostModel, config: PlannerConfig) -> Self {
        Self { model, config }
    }

    /// Largest batch for `budget` after `reduce_batch_size`; `None` when unlimited.
    pub fn batch_size(&self, n_samples: usize, budget: MemoryBudget) -> Option<i64> {
        match budget {
            MemoryBudget::Unlimited => None,
            MemoryBudget::FreeGb(gb) => Some(
                self.model
                    .max_pairs(gb, n_samples)
                    .saturating_sub(self.config.reduce_batch_size as i64),
            ),
        }
    }

    pub fn plan(
        &self,
        n_pairs: usize,
        n_samples: usize,
        budget: MemoryBudget,
    ) -> Result<BatchPlan, WritheError> {
        let batch = match self.batch_size(n_samples, budget) {
            None => {
                log::debug!("writhe plan: unlimited budget, {} pairs in one chunk", n_pairs);
                return Ok(BatchPlan::split(n_pairs, n_pairs));
            }
            Some(b) => b,
        };
        if batch <= 0 {
            let budget_gb = match budget {
                MemoryBudget::FreeGb(gb) => gb,
                MemoryBudget::Unlimited => f64::INFINITY,
            };
            return Err(WritheError::ResourceExhaustion {
                budget_gb,
                batch_size: batch,
            });
        }
        let batch = batch as u64;
        let plan = if batch >= n_pairs as u64 {
            BatchPlan::split(n_pairs, n_pairs)
        } else {
            BatchPlan::split(n_pairs, batch as usize)
        };
        log::debug!(
            "writhe plan: {:?}, {} samples, batch {} -> {} chunk(s) of {} pairs",
            budget,
            n_samples,
            batch,
            plan.n_chunks(),
            plan.batch_size
        );
        Ok(plan)
    }
}
