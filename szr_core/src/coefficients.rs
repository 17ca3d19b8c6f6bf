//! Error-bounded compression of the regression coefficients.
//!
//! Only blocks coded with the regression predictor carry coefficients. Each
//! of the four slots is predicted from the previous block's *reconstructed*
//! value in that slot, so the encoder and decoder walk identical state.

use crate::error::{Result, SzError};
use crate::partition::BLOCK_SIZE;
use crate::quantizer::{LinearQuantizer, ESCAPE_SYMBOL};
use crate::regression::RegressionCoeffs;

/// Interval capacity of every coefficient slot.
pub const COEFF_CAPACITY: i32 = 65536;

/// Symbol radius of every coefficient slot.
pub const COEFF_RADIUS: i32 = COEFF_CAPACITY / 2;

/// Alphabet size of the coefficient Huffman codes.
pub const COEFF_STATE_NUM: usize = 2 * COEFF_CAPACITY as usize;

/// Coefficient precision relative to the sample error bound.
const REL_PARAM_ERR: f32 = 0.025;

/// Per-slot precisions: the three slopes are scaled down by the block edge
/// because their error is multiplied by a coordinate of up to that size.
pub fn slot_precisions(precision: f64) -> [f64; 4] {
    let slope = REL_PARAM_ERR as f64 * precision / BLOCK_SIZE as f64;
    [slope, slope, slope, REL_PARAM_ERR as f64 * precision]
}

/// One coefficient slot's quantized stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotStream {
    pub precision: f64,
    pub symbols: Vec<i32>,
    pub unpredictable: Vec<f32>,
}

/// Quantize the coefficients of the regression blocks, in block order,
/// replacing each with its reconstruction.
pub fn quantize(coeffs: &mut [RegressionCoeffs], precision: f64) -> Result<[SlotStream; 4]> {
    let precisions = slot_precisions(precision);
    let mut streams: [SlotStream; 4] = Default::default();
    for (stream, &p) in streams.iter_mut().zip(&precisions) {
        stream.precision = p;
        stream.symbols = crate::error::try_with_capacity(coeffs.len())?;
        stream.unpredictable = crate::error::try_with_capacity(coeffs.len())?;
    }

    let mut last = [0f32; 4];
    for block in coeffs.iter_mut() {
        for (slot, stream) in streams.iter_mut().enumerate() {
            let quant = LinearQuantizer::new(stream.precision, COEFF_CAPACITY);
            let value = block.0[slot];
            let (symbol, recon) = quant.quantize(value, last[slot]).unwrap_or_else(|| {
                stream.unpredictable.push(value);
                (ESCAPE_SYMBOL, value)
            });
            stream.symbols.push(symbol);
            last[slot] = recon;
            block.0[slot] = recon;
        }
    }
    Ok(streams)
}

/// Rebuild the coefficients of `count` regression blocks from their slot
/// streams.
pub fn reconstruct(
    slots: &[SlotStream; 4],
    radius: [i32; 4],
    count: usize,
) -> Result<Vec<RegressionCoeffs>> {
    for (slot, stream) in slots.iter().enumerate() {
        if stream.symbols.len() != count {
            return Err(SzError::Internal(format!(
                "coefficient slot {slot} has {} symbols for {count} regression blocks",
                stream.symbols.len()
            )));
        }
    }

    let mut out = crate::error::try_with_capacity(count)?;
    let mut last = [0f32; 4];
    let mut raw_pos = [0usize; 4];
    for n in 0..count {
        let mut block = RegressionCoeffs::default();
        for (slot, stream) in slots.iter().enumerate() {
            let value = match stream.symbols[n] {
                ESCAPE_SYMBOL => {
                    let v = stream.unpredictable.get(raw_pos[slot]).copied().ok_or_else(|| {
                        SzError::Internal(format!(
                            "coefficient slot {slot} ran out of unpredictable values"
                        ))
                    })?;
                    raw_pos[slot] += 1;
                    v
                }
                symbol => {
                    let quant = LinearQuantizer {
                        precision: stream.precision,
                        capacity: COEFF_CAPACITY,
                        radius: radius[slot],
                    };
                    quant.reconstruct(last[slot], symbol)
                }
            };
            last[slot] = value;
            block.0[slot] = value;
        }
        out.push(block);
    }
    Ok(out)
}
