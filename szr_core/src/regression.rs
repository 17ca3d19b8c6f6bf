//! Per-block plane fit `value ~ a*x + b*y + c*z + d` over local coordinates.
//!
//! The coordinate grid is the fixed `0..BLOCK_SIZE` cube, so the normal
//! equations decouple and each coefficient is a closed-form function of the
//! first moments `sum(v*x)`, `sum(v*y)`, `sum(v*z)` and `sum(v)`.

use crate::error::Result;
use crate::partition::{BlockGrid, BLOCK_ELEMENTS, BLOCK_SIZE};

/// Regression coefficients of one block, in slot order `[a, b, c, d]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegressionCoeffs(pub [f32; 4]);

impl RegressionCoeffs {
    /// Evaluate the plane at local coordinates.
    #[inline]
    pub fn predict(&self, x: f32, y: f32, z: f32) -> f32 {
        let [a, b, c, d] = self.0;
        a * x + b * y + c * z + d
    }
}

/// Fit one staged block (local `(ii, jj, kk)` order).
pub fn fit(block: &[f32; BLOCK_ELEMENTS]) -> RegressionCoeffs {
    let mut fx = 0f32;
    let mut fy = 0f32;
    let mut fz = 0f32;
    let mut f = 0f32;
    let mut n = 0;
    for i in 0..BLOCK_SIZE {
        let mut sum_x = 0f32;
        for j in 0..BLOCK_SIZE {
            let mut sum_y = 0f32;
            for k in 0..BLOCK_SIZE {
                let v = block[n];
                n += 1;
                sum_y += v;
                fz += v * k as f32;
            }
            fy += sum_y * j as f32;
            sum_x += sum_y;
        }
        fx += sum_x * i as f32;
        f += sum_x;
    }

    let edge = BLOCK_SIZE as f32;
    let coeff = (1.0f64 / BLOCK_ELEMENTS as f64) as f32;
    let slope = |moment: f32| (2.0 * moment / (edge - 1.0) - f) * 6.0 * coeff / (edge + 1.0);
    let a = slope(fx);
    let b = slope(fy);
    let c = slope(fz);
    let d = f * coeff
        - ((edge - 1.0) * a / 2.0 + (edge - 1.0) * b / 2.0 + (edge - 1.0) * c / 2.0);
    RegressionCoeffs([a, b, c, d])
}

/// Fit every block of the grid, in block order.
pub fn fit_all(volume: &[f32], grid: &BlockGrid) -> Result<Vec<RegressionCoeffs>> {
    let mut out = crate::error::try_with_capacity(grid.num_blocks())?;
    out.extend(grid.blocks().map(|b| fit(&grid.gather(volume, b))));
    Ok(out)
}
