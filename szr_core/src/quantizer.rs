//! Error-bounded interval quantization of block samples.
//!
//! Symbol 0 is the escape code: the sample is stored raw in the
//! unpredictable-value list. Under mean mode, symbol 1 on a Lorenzo block
//! means "exactly the dense-value mean".

use crate::error::{Result, SzError};
use crate::partition::{HaloBlock, BLOCK_ELEMENTS, BLOCK_SIZE};
use crate::regression::RegressionCoeffs;

/// Escape symbol: value stored verbatim.
pub const ESCAPE_SYMBOL: i32 = 0;

/// Mean-substitution symbol, only meaningful on Lorenzo blocks.
pub const MEAN_SYMBOL: i32 = 1;

/// Linear interval quantizer around a prediction.
///
/// A residual maps to `trunc(±(|diff| / precision + 1) / 2) + radius`; the
/// reconstruction `pred + 2 * (symbol - radius) * precision` is within
/// `precision` of the input or the sample escapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearQuantizer {
    pub precision: f64,
    pub capacity: i32,
    pub radius: i32,
}

impl LinearQuantizer {
    pub fn new(precision: f64, capacity: i32) -> Self {
        Self {
            precision,
            capacity,
            radius: capacity / 2,
        }
    }

    /// Same radius, `reserved` fewer usable intervals.
    pub fn tightened(self, reserved: i32) -> Self {
        Self {
            capacity: self.capacity - reserved,
            ..self
        }
    }

    /// Quantize `value` against `pred`. `None` means the value must escape.
    #[inline]
    pub fn quantize(&self, value: f32, pred: f32) -> Option<(i32, f32)> {
        let diff = (value - pred) as f64;
        let itv = diff.abs() / self.precision + 1.0;
        // NaN and infinities fail this comparison and escape.
        if !(itv < self.capacity as f64) {
            return None;
        }
        let signed = if diff < 0.0 { -itv } else { itv };
        let symbol = (signed / 2.0) as i32 + self.radius;
        let recon = self.reconstruct(pred, symbol);
        if ((value - recon) as f64).abs() > self.precision {
            return None;
        }
        Some((symbol, recon))
    }

    #[inline]
    pub fn reconstruct(&self, pred: f32, symbol: i32) -> f32 {
        (pred as f64 + 2.0 * (symbol - self.radius) as f64 * self.precision) as f32
    }
}

/// Quantizer state shared by every block of one call.
#[derive(Debug, Clone, Copy)]
pub struct SampleQuantizer {
    /// Used by regression blocks: the full interval capacity.
    pub regression: LinearQuantizer,
    /// Used by Lorenzo blocks: two codes fewer, keeping 0 and 1 free.
    pub lorenzo: LinearQuantizer,
    pub mean: Option<f32>,
}

impl SampleQuantizer {
    pub fn new(precision: f64, intervals: u32, mean: Option<f32>) -> Self {
        let regression = LinearQuantizer::new(precision, intervals as i32);
        Self {
            regression,
            lorenzo: regression.tightened(2),
            mean,
        }
    }

    #[inline]
    fn mean_hit(&self, value: f32) -> Option<f32> {
        self.mean
            .filter(|&m| ((value - m) as f64).abs() <= self.regression.precision)
    }

    /// Encode a block with the plane predictor. Returns the escape count.
    pub fn encode_regression(
        &self,
        block: &[f32; BLOCK_ELEMENTS],
        coeffs: &RegressionCoeffs,
        symbols: &mut [i32],
        unpredictable: &mut Vec<f32>,
    ) -> usize {
        let mut escaped = 0;
        let mut n = 0;
        for ii in 0..BLOCK_SIZE {
            for jj in 0..BLOCK_SIZE {
                for kk in 0..BLOCK_SIZE {
                    let value = block[n];
                    let pred = coeffs.predict(ii as f32, jj as f32, kk as f32);
                    symbols[n] = match self.regression.quantize(value, pred) {
                        Some((symbol, _)) => symbol,
                        None => {
                            unpredictable.push(value);
                            escaped += 1;
                            ESCAPE_SYMBOL
                        }
                    };
                    n += 1;
                }
            }
        }
        escaped
    }

    /// Encode a staged block with the Lorenzo predictor, overwriting each
    /// position with its reconstruction so later predictions see what the
    /// decoder will see. Returns the escape count.
    pub fn encode_lorenzo(
        &self,
        staged: &mut HaloBlock,
        symbols: &mut [i32],
        unpredictable: &mut Vec<f32>,
    ) -> usize {
        let mut escaped = 0;
        let mut n = 0;
        for x in 1..=BLOCK_SIZE {
            for y in 1..=BLOCK_SIZE {
                for z in 1..=BLOCK_SIZE {
                    let value = staged.get(x, y, z);
                    let (symbol, recon) = match self.mean_hit(value) {
                        Some(mean) => (MEAN_SYMBOL, mean),
                        None => {
                            let pred = staged.lorenzo(x, y, z);
                            self.lorenzo.quantize(value, pred).unwrap_or_else(|| {
                                unpredictable.push(value);
                                escaped += 1;
                                (ESCAPE_SYMBOL, value)
                            })
                        }
                    };
                    symbols[n] = symbol;
                    staged.set(x, y, z, recon);
                    n += 1;
                }
            }
        }
        escaped
    }

    /// Inverse of [`encode_regression`](Self::encode_regression).
    /// `unpredictable` must hold exactly this block's escaped values.
    pub fn decode_regression(
        &self,
        coeffs: &RegressionCoeffs,
        symbols: &[i32],
        unpredictable: &[f32],
    ) -> Result<[f32; BLOCK_ELEMENTS]> {
        let mut out = [0f32; BLOCK_ELEMENTS];
        let mut raw = unpredictable.iter();
        let mut n = 0;
        for ii in 0..BLOCK_SIZE {
            for jj in 0..BLOCK_SIZE {
                for kk in 0..BLOCK_SIZE {
                    out[n] = match symbols[n] {
                        ESCAPE_SYMBOL => *raw.next().ok_or_else(exhausted)?,
                        symbol => {
                            let pred = coeffs.predict(ii as f32, jj as f32, kk as f32);
                            self.regression.reconstruct(pred, symbol)
                        }
                    };
                    n += 1;
                }
            }
        }
        ensure_consumed(raw.len())?;
        Ok(out)
    }

    /// Inverse of [`encode_lorenzo`](Self::encode_lorenzo).
    pub fn decode_lorenzo(
        &self,
        symbols: &[i32],
        unpredictable: &[f32],
    ) -> Result<[f32; BLOCK_ELEMENTS]> {
        let mut staged = HaloBlock::zeroed();
        let mut out = [0f32; BLOCK_ELEMENTS];
        let mut raw = unpredictable.iter();
        let mut n = 0;
        for x in 1..=BLOCK_SIZE {
            for y in 1..=BLOCK_SIZE {
                for z in 1..=BLOCK_SIZE {
                    let value = match (symbols[n], self.mean) {
                        (ESCAPE_SYMBOL, _) => *raw.next().ok_or_else(exhausted)?,
                        (MEAN_SYMBOL, Some(mean)) => mean,
                        (symbol, _) => self.lorenzo.reconstruct(staged.lorenzo(x, y, z), symbol),
                    };
                    staged.set(x, y, z, value);
                    out[n] = value;
                    n += 1;
                }
            }
        }
        ensure_consumed(raw.len())?;
        Ok(out)
    }
}

fn exhausted() -> SzError {
    SzError::Internal("block ran out of unpredictable values".into())
}

fn ensure_consumed(left: usize) -> Result<()> {
    if left != 0 {
        return Err(SzError::Internal(format!(
            "block left {left} unpredictable values unused"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{BlockGrid, Dims};

    #[test]
    fn test_quantize_within_bound() {
        let q = LinearQuantizer::new(0.01, 1024);
        for &(value, pred) in &[(1.0f32, 0.975f32), (-3.5, -3.0), (0.0, 0.0), (2.0, 2.004)] {
            let (symbol, recon) = q.quantize(value, pred).unwrap();
            assert!(symbol > 0 && symbol < 1024);
            assert!(((value - recon) as f64).abs() <= 0.01);
            assert_eq!(q.reconstruct(pred, symbol), recon);
        }
    }

    #[test]
    fn test_capacity_overflow_escapes() {
        let q = LinearQuantizer::new(0.01, 32);
        assert!(q.quantize(100.0, 0.0).is_none());
        assert!(q.quantize(f32::NAN, 0.0).is_none());
        assert!(q.quantize(1.0, f32::INFINITY).is_none());
    }

    #[test]
    fn test_lorenzo_symbols_leave_mean_code_free() {
        let q = LinearQuantizer::new(1.0, 32).tightened(2);
        for d in -40..=40 {
            if let Some((symbol, _)) = q.quantize(d as f32, 0.0) {
                assert!(symbol >= 2, "diff {d} produced symbol {symbol}");
            }
        }
    }

    fn noisy_block(seed: u64) -> [f32; BLOCK_ELEMENTS] {
        let mut rng = seed;
        let mut out = [0f32; BLOCK_ELEMENTS];
        for (n, v) in out.iter_mut().enumerate() {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = n as f32 * 0.1 + ((rng >> 40) as f32 / (1u64 << 24) as f32);
        }
        out
    }

    #[test]
    fn test_regression_block_roundtrip() {
        let block = noisy_block(7);
        let coeffs = crate::regression::fit(&block);
        let quant = SampleQuantizer::new(0.05, 64, None);
        let mut symbols = [0i32; BLOCK_ELEMENTS];
        let mut unpred = Vec::new();
        let escaped = quant.encode_regression(&block, &coeffs, &mut symbols, &mut unpred);
        assert_eq!(escaped, unpred.len());

        let decoded = quant.decode_regression(&coeffs, &symbols, &unpred).unwrap();
        for (n, (&orig, &got)) in block.iter().zip(decoded.iter()).enumerate() {
            if symbols[n] == ESCAPE_SYMBOL {
                assert_eq!(orig.to_bits(), got.to_bits());
            } else {
                assert!(((orig - got) as f64).abs() <= 0.05);
            }
        }
    }

    #[test]
    fn test_lorenzo_block_roundtrip_with_mean() {
        let dims = Dims::new(6, 6, 6).unwrap();
        let grid = BlockGrid::new(dims);
        let mut volume: Vec<f32> = noisy_block(11).to_vec();
        for v in volume.iter_mut().step_by(3) {
            *v = 2.5;
        }
        let block = grid.block(0).unwrap();
        let quant = SampleQuantizer::new(0.01, 1 << 12, Some(2.5));

        let mut staged = HaloBlock::load(&volume, &grid, block);
        let mut symbols = [0i32; BLOCK_ELEMENTS];
        let mut unpred = Vec::new();
        quant.encode_lorenzo(&mut staged, &mut symbols, &mut unpred);

        let decoded = quant.decode_lorenzo(&symbols, &unpred).unwrap();
        for n in 0..BLOCK_ELEMENTS {
            assert!(((volume[n] - decoded[n]) as f64).abs() <= 0.01);
            if n % 3 == 0 {
                assert_eq!(symbols[n], MEAN_SYMBOL);
                assert_eq!(decoded[n], 2.5);
            }
        }
    }

    #[test]
    fn test_decode_rejects_missing_unpredictable() {
        let quant = SampleQuantizer::new(0.01, 64, None);
        let symbols = [ESCAPE_SYMBOL; BLOCK_ELEMENTS];
        assert!(quant.decode_lorenzo(&symbols, &[1.0; 3]).is_err());
    }
}
