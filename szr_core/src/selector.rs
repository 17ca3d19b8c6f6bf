//! Per-block choice between the Lorenzo and regression predictors.
//!
//! Both predictors are scored on a diagonal sweep of sample points taken
//! from the original (unquantized) block. The Lorenzo score carries a noise
//! term for the slack its reconstruction error compounds with; under mean
//! mode each Lorenzo sample may instead cost its distance to the mean.

use crate::error::Result;
use crate::partition::{BlockGrid, HaloBlock, BLOCK_SIZE};
use crate::regression::RegressionCoeffs;

/// Multiplier of the precision added to every Lorenzo sample error.
pub const LORENZO_NOISE_FACTOR: f64 = 1.22;

/// Which predictor a block is coded with. `Lorenzo` is the `true` bit of
/// the indicator bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    Lorenzo,
    Regression,
}

impl PredictorKind {
    #[inline]
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            PredictorKind::Lorenzo
        } else {
            PredictorKind::Regression
        }
    }

    #[inline]
    pub fn bit(self) -> bool {
        self == PredictorKind::Lorenzo
    }
}

/// Scores a staged block against its fitted plane.
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    noise: f32,
    mean: Option<f32>,
}

impl Selector {
    pub fn new(precision: f64, mean: Option<f32>) -> Self {
        Self {
            noise: (precision * LORENZO_NOISE_FACTOR) as f32,
            mean,
        }
    }

    /// Pick the predictor for one block.
    ///
    /// Regression wins only when its summed error is strictly smaller; ties
    /// and NaN scores go to Lorenzo.
    pub fn choose(&self, staged: &HaloBlock, coeffs: &RegressionCoeffs) -> PredictorKind {
        let mut err_lorenzo = 0f32;
        let mut err_regression = 0f32;
        for t in 2..=BLOCK_SIZE {
            let m = BLOCK_SIZE + 1 - t;
            // Mirrored axes are evaluated at `m`, not `m - 1`.
            let swept = (t - 1) as f32;
            let mirrored = m as f32;
            let samples = [
                ((t, t, t), (swept, swept, swept)),
                ((t, t, m), (swept, swept, mirrored)),
                ((t, m, t), (swept, mirrored, swept)),
                ((t, m, m), (swept, mirrored, mirrored)),
            ];
            for ((x, y, z), (px, py, pz)) in samples {
                let value = staged.get(x, y, z);
                let pred_lorenzo = staged.lorenzo(x, y, z);
                let pred_regression = coeffs.predict(px, py, pz);
                err_lorenzo = (err_lorenzo as f64 + self.lorenzo_cost(value, pred_lorenzo)) as f32;
                err_regression =
                    (err_regression as f64 + ((pred_regression - value) as f64).abs()) as f32;
            }
        }
        PredictorKind::from_bit(!(err_regression < err_lorenzo))
    }

    #[inline]
    fn lorenzo_cost(&self, value: f32, pred: f32) -> f64 {
        let cost = ((pred - value) as f64).abs() + self.noise as f64;
        match self.mean {
            Some(mean) => cost.min(((mean - value) as f64).abs()),
            None => cost,
        }
    }
}

/// Choose a predictor for every block, in block order.
pub fn select_all(
    volume: &[f32],
    grid: &BlockGrid,
    coeffs: &[RegressionCoeffs],
    selector: &Selector,
) -> Result<Vec<PredictorKind>> {
    let mut out = crate::error::try_with_capacity(grid.num_blocks())?;
    for (block, fitted) in grid.blocks().zip(coeffs) {
        let staged = HaloBlock::load(volume, grid, block);
        out.push(selector.choose(&staged, fitted));
    }
    Ok(out)
}
