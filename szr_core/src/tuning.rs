//! Interval auto-tuning and dense-value detection from sampled data.
//!
//! The tuner walks the volume at a fixed stride. Samples with a full set of
//! lower neighbors contribute their Lorenzo prediction error (on original
//! data) to an error histogram, from which the interval capacity is picked.
//! Every finite sample also lands in a density histogram of its offset from a
//! coarse volume mean, measured in units of the precision; the densest pair
//! of adjacent bins locates the dense value used by mean mode.

use crate::config::SzConfig;
use crate::error::Result;
use crate::partition::Dims;

/// Number of density histogram bins.
pub const DENSITY_BINS: usize = 8192;

const DENSITY_RADIUS: usize = DENSITY_BINS / 2;

/// Smallest interval capacity the tuner hands out.
pub const MIN_INTERVALS: u32 = 32;

/// The densest window found by the tuner: two adjacent bins of width
/// `precision` starting at `center + precision * (first_bin - radius)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseWindow {
    pub center: f64,
    pub precision: f64,
    pub first_bin: usize,
}

impl DenseWindow {
    #[inline]
    fn bin(&self, value: f32) -> usize {
        density_bin(value as f64 - self.center, self.precision)
    }

    /// Whether `value` falls in the two bins of the window.
    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        let bin = self.bin(value);
        bin == self.first_bin || bin == self.first_bin + 1
    }
}

/// Everything the tuner learned from one pass over the samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningResult {
    pub intervals: u32,
    /// Fraction of prediction samples whose Lorenzo error is below precision.
    pub sample_correct_freq: f64,
    /// Fraction of density samples inside the dense window.
    pub mean_freq: f64,
    pub window: DenseWindow,
}

impl TuningResult {
    /// Mean substitution pays off when the dense value dominates or beats
    /// plain prediction.
    pub fn use_mean(&self) -> bool {
        self.mean_freq > 0.5 || self.mean_freq > self.sample_correct_freq
    }
}

fn density_bin(diff: f64, precision: f64) -> usize {
    let scaled = diff / precision;
    let index = if diff > 0.0 {
        scaled as i64 + DENSITY_RADIUS as i64
    } else {
        scaled as i64 - 1 + DENSITY_RADIUS as i64
    };
    index.clamp(0, DENSITY_BINS as i64 - 1) as usize
}

/// Lorenzo prediction on the original volume at a position with every
/// coordinate >= 1.
fn lorenzo_at(volume: &[f32], dims: Dims, x: usize, y: usize, z: usize) -> f32 {
    let p = dims.offset(x, y, z);
    let d0 = dims.dim0();
    let d1 = dims.dim1();
    volume[p - 1] + volume[p - d1] + volume[p - d0]
        - volume[p - d1 - 1]
        - volume[p - d0 - 1]
        - volume[p - d0 - d1]
        + volume[p - d0 - d1 - 1]
}

/// Coarse mean of the finite samples on a `sqrt(len)` stride.
fn coarse_mean(volume: &[f32]) -> f64 {
    let stride = ((volume.len() as f64).sqrt() as usize).max(1);
    let (sum, count) = volume
        .iter()
        .step_by(stride)
        .filter(|v| v.is_finite())
        .fold((0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Derive the interval capacity and the dense window from sampled data.
pub fn optimize_intervals(
    volume: &[f32],
    dims: Dims,
    precision: f64,
    config: &SzConfig,
) -> Result<TuningResult> {
    let max_radius = config.max_range_radius as usize;
    let mut error_hist = crate::error::try_filled(max_radius, 0usize)?;
    let mut density_hist = crate::error::try_filled(DENSITY_BINS, 0usize)?;
    let center = coarse_mean(volume);

    let mut pred_samples = 0usize;
    let mut correct = 0usize;
    let mut density_samples = 0usize;
    for n in (0..volume.len()).step_by(config.sample_distance) {
        let value = volume[n];
        if value.is_finite() {
            density_hist[density_bin(value as f64 - center, precision)] += 1;
            density_samples += 1;
        }

        let x = n / dims.dim0();
        let y = (n % dims.dim0()) / dims.dim1();
        let z = n % dims.dim1();
        if x == 0 || y == 0 || z == 0 {
            continue;
        }
        let err = ((lorenzo_at(volume, dims, x, y, z) - value) as f64).abs();
        if err < precision {
            correct += 1;
        }
        let radius_index = if err.is_nan() {
            max_radius - 1
        } else {
            ((err / precision + 1.0) / 2.0) as usize
        };
        error_hist[radius_index.min(max_radius - 1)] += 1;
        pred_samples += 1;
    }

    let intervals = if pred_samples == 0 {
        MIN_INTERVALS
    } else {
        let target = pred_samples as f64 * config.pred_threshold;
        let mut sum = 0usize;
        let mut radius = max_radius - 1;
        for (i, &count) in error_hist.iter().enumerate() {
            sum += count;
            if sum as f64 > target {
                radius = i;
                break;
            }
        }
        ((2 * (radius + 1)) as u32)
            .next_power_of_two()
            .max(MIN_INTERVALS)
    };

    let mut best_sum = 0usize;
    let mut first_bin = 0usize;
    for i in 1..DENSITY_BINS - 2 {
        let pair = density_hist[i] + density_hist[i + 1];
        if pair > best_sum {
            best_sum = pair;
            first_bin = i;
        }
    }

    let result = TuningResult {
        intervals,
        sample_correct_freq: if pred_samples == 0 {
            0.0
        } else {
            correct as f64 / pred_samples as f64
        },
        mean_freq: best_sum as f64 / density_samples.max(1) as f64,
        window: DenseWindow {
            center,
            precision,
            first_bin,
        },
    };
    tracing::trace!(
        pred_samples,
        density_samples,
        intervals = result.intervals,
        correct_freq = result.sample_correct_freq,
        mean_freq = result.mean_freq,
        "interval tuning"
    );
    Ok(result)
}

/// Average of every sample inside the dense window, or `None` when the
/// window is empty.
pub fn dense_mean(volume: &[f32], window: &DenseWindow) -> Option<f32> {
    let (sum, count) = volume
        .iter()
        .filter(|&&v| window.contains(v))
        .fold((0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
    (count > 0).then(|| (sum / count as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sample_distance: usize) -> SzConfig {
        SzConfig {
            sample_distance,
            ..SzConfig::default()
        }
    }

    #[test]
    fn test_density_bin_edges() {
        assert_eq!(density_bin(0.0, 1.0), DENSITY_RADIUS - 1);
        assert_eq!(density_bin(0.5, 1.0), DENSITY_RADIUS);
        assert_eq!(density_bin(-0.5, 1.0), DENSITY_RADIUS - 1);
        assert_eq!(density_bin(1e12, 1.0), DENSITY_BINS - 1);
        assert_eq!(density_bin(-1e12, 1.0), 0);
    }

    #[test]
    fn test_constant_volume_is_all_dense() {
        let dims = Dims::new(10, 10, 10).unwrap();
        let volume = vec![3.25f32; dims.len()];
        let tuned = optimize_intervals(&volume, dims, 1e-3, &config(7)).unwrap();
        assert_eq!(tuned.intervals, MIN_INTERVALS);
        assert_eq!(tuned.mean_freq, 1.0);
        assert!(tuned.use_mean());
        assert_eq!(dense_mean(&volume, &tuned.window), Some(3.25));
    }

    #[test]
    fn test_noisy_volume_needs_more_intervals() {
        let dims = Dims::new(16, 16, 16).unwrap();
        let mut rng = 99u64;
        let volume: Vec<f32> = (0..dims.len())
            .map(|_| {
                rng = rng
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (rng >> 40) as f32 / (1u64 << 24) as f32 * 100.0
            })
            .collect();
        let tuned = optimize_intervals(&volume, dims, 1e-2, &config(3)).unwrap();
        assert!(tuned.intervals > MIN_INTERVALS);
        assert!(tuned.intervals.is_power_of_two());
        assert!(tuned.intervals <= 2 * SzConfig::default().max_range_radius);
        assert!(tuned.mean_freq < 0.5);
    }

    #[test]
    fn test_single_row_has_no_prediction_samples() {
        let dims = Dims::new(1, 1, 50).unwrap();
        let volume: Vec<f32> = (0..50).map(|i| i as f32).collect();
        let tuned = optimize_intervals(&volume, dims, 0.5, &config(1)).unwrap();
        assert_eq!(tuned.intervals, MIN_INTERVALS);
        assert_eq!(tuned.sample_correct_freq, 0.0);
    }

    #[test]
    fn test_dense_window_covers_two_bins() {
        let window = DenseWindow {
            center: 10.0,
            precision: 0.5,
            first_bin: DENSITY_RADIUS + 2,
        };
        assert!(window.contains(11.2));
        assert!(window.contains(11.8));
        assert!(!window.contains(10.8));
        assert!(!window.contains(12.2));
        assert!(!window.contains(f32::NAN));
    }

    #[test]
    fn test_non_finite_samples_skip_density_pass() {
        let dims = Dims::new(10, 10, 10).unwrap();
        let mut volume = vec![3.25f32; dims.len()];
        volume[0] = f32::NAN;
        volume[7] = f32::INFINITY;
        let tuned = optimize_intervals(&volume, dims, 1e-3, &config(7)).unwrap();
        assert_eq!(tuned.window.center, 3.25);
        assert_eq!(tuned.mean_freq, 1.0);
        assert_eq!(dense_mean(&volume, &tuned.window), Some(3.25));
    }

    #[test]
    fn test_single_nan_keeps_smooth_volume_out_of_mean_mode() {
        let dims = Dims::new(24, 24, 24).unwrap();
        let mut volume = Vec::with_capacity(dims.len());
        for x in 0..24 {
            for y in 0..24 {
                for z in 0..24 {
                    let (xf, yf, zf) = (x as f32, y as f32, z as f32);
                    volume.push((xf * 0.2).sin() * 3.0 + (yf * 0.15).cos() * 2.0 + zf * 0.1);
                }
            }
        }
        let clean = optimize_intervals(&volume, dims, 1e-3, &config(7)).unwrap();
        volume[0] = f32::NAN;
        let poisoned = optimize_intervals(&volume, dims, 1e-3, &config(7)).unwrap();
        assert!(poisoned.window.center.is_finite());
        assert!(poisoned.mean_freq < 0.5);
        assert_eq!(poisoned.use_mean(), clean.use_mean());
    }
}
