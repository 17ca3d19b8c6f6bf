//! Tuning parameters for one compression call.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SzError};

/// Width of the size-typed container fields (element count, stream
/// lengths, unpredictable totals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeType {
    U32,
    #[default]
    U64,
}

impl SizeType {
    pub fn width(self) -> usize {
        match self {
            SizeType::U32 => 4,
            SizeType::U64 => 8,
        }
    }

    /// Largest value the field can hold.
    pub fn max_value(self) -> u64 {
        match self {
            SizeType::U32 => u32::MAX as u64,
            SizeType::U64 => u64::MAX,
        }
    }
}

/// Compression configuration.
///
/// Every field has a working default; `quantization_intervals == 0` turns
/// on interval auto-tuning, which is also the only mode in which the
/// dense-value (mean) substitution can activate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SzConfig {
    /// Fixed interval capacity, or 0 to derive it from sampled data.
    pub quantization_intervals: u32,
    /// Upper limit on the auto-tuned interval radius.
    pub max_range_radius: u32,
    /// Stride between samples taken by the tuner.
    pub sample_distance: usize,
    /// Fraction of sampled prediction errors the tuned capacity must cover.
    pub pred_threshold: f64,
    pub size_type: SizeType,
}

impl Default for SzConfig {
    fn default() -> Self {
        Self {
            quantization_intervals: 0,
            max_range_radius: 32768,
            sample_distance: 100,
            pred_threshold: 0.99,
            size_type: SizeType::U64,
        }
    }
}

impl SzConfig {
    pub fn with_intervals(intervals: u32) -> Self {
        Self {
            quantization_intervals: intervals,
            ..Self::default()
        }
    }

    pub fn auto_tune(&self) -> bool {
        self.quantization_intervals == 0
    }

    pub fn validate(&self) -> Result<()> {
        let q = self.quantization_intervals;
        if q != 0 && (q < 4 || q % 2 != 0) {
            return Err(SzError::InvalidConfig(format!(
                "quantization_intervals must be 0 (auto) or an even number >= 4, got {q}"
            )));
        }
        if q > i32::MAX as u32 / 2 {
            return Err(SzError::InvalidConfig(format!(
                "quantization_intervals {q} is too large"
            )));
        }
        if self.max_range_radius == 0 || self.max_range_radius > 1 << 20 {
            return Err(SzError::InvalidConfig(format!(
                "max_range_radius must be in 1..=1048576, got {}",
                self.max_range_radius
            )));
        }
        if self.sample_distance == 0 {
            return Err(SzError::InvalidConfig(
                "sample_distance must be at least 1".into(),
            ));
        }
        if !(self.pred_threshold > 0.0 && self.pred_threshold <= 1.0) {
            return Err(SzError::InvalidConfig(format!(
                "pred_threshold must be in (0, 1], got {}",
                self.pred_threshold
            )));
        }
        Ok(())
    }
}
