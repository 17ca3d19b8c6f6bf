use std::sync::Arc;

use tracing::{debug, trace};

use crate::bitmap;
use crate::codec::{self, Codec};
use crate::coefficients::{self, COEFF_RADIUS, COEFF_STATE_NUM};
use crate::config::SzConfig;
use crate::error::{Result, SzError};
use crate::format::{
    max_container_size, payload_checksum, BoundedWriter, ContainerBound, Header,
};
use crate::huffman::HuffmanTree;
use crate::partition::{BlockGrid, Dims, HaloBlock, BLOCK_ELEMENTS, BLOCK_SIZE};
use crate::quantizer::SampleQuantizer;
use crate::regression::{self, RegressionCoeffs};
use crate::selector::{self, PredictorKind, Selector};
use crate::tuning;

/// One-shot compressor producing SZRB containers.
///
/// # Format layout written
/// ```text
/// [HEADER: 48 bytes, checksum patched last]
/// [element count][block size][precision][intervals][main tree]
/// [mean flag + mean][indicator bitmap]
/// [4 x coefficient slot]                     ← only with regression blocks
/// [unpredictable total][counts array][unpredictable floats]
/// [chunk-size array][block 0 chunk] ... [block N-1 chunk]
/// ```
/// The output buffer is reserved once at its worst-case size and never
/// grows past it.
pub struct Writer {
    codec: Arc<dyn Codec>,
    config: SzConfig,
}

/// Symbols and escapes produced by the sample quantizer for every block.
struct QuantizedBlocks {
    symbols: Vec<i32>,
    unpredictable: Vec<f32>,
    counts: Vec<i32>,
}

impl Writer {
    pub fn new(codec: Arc<dyn Codec>, config: SzConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { codec, config })
    }

    /// Compress a row-major `r1 x r2 x r3` volume so that every decoded
    /// sample lies within `precision` of its original, or decodes exactly.
    pub fn compress(&self, volume: &[f32], dims: Dims, precision: f64) -> Result<Vec<u8>> {
        // Struct literals skip `Dims::new`, so the extents are checked here too.
        let dims = Dims::new(dims.r1, dims.r2, dims.r3)?;
        if !(precision.is_finite() && precision > 0.0) {
            return Err(SzError::InvalidPrecision(precision));
        }
        if volume.len() != dims.len() {
            return Err(SzError::LengthMismatch {
                expected: dims.len(),
                actual: volume.len(),
            });
        }
        let size_type = self.config.size_type;
        if dims.len() as u64 > size_type.max_value() {
            return Err(SzError::InvalidConfig(format!(
                "{} elements do not fit a {}-byte size field",
                dims.len(),
                size_type.width()
            )));
        }

        let grid = BlockGrid::new(dims);
        let num_blocks = grid.num_blocks();
        let mut coeffs = regression::fit_all(volume, &grid)?;

        let (intervals, mean) = if self.config.auto_tune() {
            let tuned = tuning::optimize_intervals(volume, dims, precision, &self.config)?;
            let mean = if tuned.use_mean() {
                tuning::dense_mean(volume, &tuned.window)
            } else {
                None
            };
            (tuned.intervals, mean)
        } else {
            (self.config.quantization_intervals, None)
        };

        let kinds = selector::select_all(volume, &grid, &coeffs, &Selector::new(precision, mean))?;
        let regression_blocks = kinds.iter().filter(|&&k| k == PredictorKind::Regression).count();
        debug!(
            num_blocks,
            regression_blocks,
            intervals,
            use_mean = mean.is_some(),
            "blocks classified"
        );

        // Coefficients of regression blocks are replaced by their
        // reconstructions before any sample is predicted from them.
        let mut reg_coeffs: Vec<RegressionCoeffs> = crate::error::try_with_capacity(regression_blocks)?;
        reg_coeffs.extend(
            kinds
                .iter()
                .zip(&coeffs)
                .filter(|(k, _)| **k == PredictorKind::Regression)
                .map(|(_, c)| *c),
        );
        let slots = coefficients::quantize(&mut reg_coeffs, precision)?;
        let mut quantized = reg_coeffs.iter();
        for (kind, c) in kinds.iter().zip(coeffs.iter_mut()) {
            if *kind == PredictorKind::Regression {
                if let Some(q) = quantized.next() {
                    *c = *q;
                }
            }
        }

        let quant = SampleQuantizer::new(precision, intervals, mean);
        let blocks = quantize_blocks(volume, &grid, &kinds, &coeffs, &quant)?;
        debug!(unpredictable = blocks.unpredictable.len(), "samples quantized");

        let main_tree = HuffmanTree::from_symbols(&blocks.symbols, 2 * intervals as usize)?;
        let coeff_trees = if regression_blocks > 0 {
            let mut trees = Vec::with_capacity(4);
            for slot in &slots {
                trees.push(HuffmanTree::from_symbols(&slot.symbols, COEFF_STATE_NUM)?);
            }
            trees
        } else {
            Vec::new()
        };

        let mut chunk_sizes: Vec<u16> = crate::error::try_with_capacity(num_blocks)?;
        for block_symbols in blocks.symbols.chunks_exact(BLOCK_ELEMENTS) {
            let len = main_tree.encoded_len(block_symbols)?;
            chunk_sizes.push(u16::try_from(len).map_err(|_| {
                SzError::Internal(format!("block chunk of {len} bytes overflows its size field"))
            })?);
        }
        let counts_packed = codec::compress_counts(self.codec.as_ref(), &blocks.counts)?;
        let sizes_packed = codec::compress_chunk_sizes(self.codec.as_ref(), &chunk_sizes)?;

        let mut bound = ContainerBound {
            size_type,
            num_blocks,
            main_tree_len: main_tree.serialized_len(),
            main_max_code_len: main_tree.max_code_len(),
            regression_blocks,
            unpredictable: blocks.unpredictable.len(),
            counts_max_len: self.codec.max_compressed_len(blocks.counts.len() * 4),
            chunk_sizes_max_len: self.codec.max_compressed_len(chunk_sizes.len() * 2),
            ..ContainerBound::default()
        };
        for (slot, tree) in coeff_trees.iter().enumerate() {
            bound.coeff_tree_lens[slot] = tree.serialized_len();
            bound.coeff_max_code_lens[slot] = tree.max_code_len();
        }
        let limit = max_container_size(&bound);
        let mut out = BoundedWriter::with_limit(limit, size_type)?;

        let header = Header::new(dims, self.codec.id(), size_type);
        out.put_bytes(&header.to_bytes())?;

        out.put_size(dims.len())?;
        out.put_i32(BLOCK_SIZE as i32)?;
        out.put_f64(precision)?;
        out.put_u32(intervals)?;
        write_tree(&mut out, &main_tree)?;
        trace!(offset = out.len(), "metadata written");

        out.put_u8(mean.is_some() as u8)?;
        out.put_f32(mean.unwrap_or(0.0))?;

        let mut flags: Vec<bool> = crate::error::try_with_capacity(kinds.len())?;
        flags.extend(kinds.iter().map(|k| k.bit()));
        out.put_with(bitmap::packed_len(flags.len()), |buf| {
            let start = buf.len();
            bitmap::pack(&flags, buf);
            Ok(buf.len() - start)
        })?;
        trace!(offset = out.len(), "indicator written");

        for (slot, tree) in slots.iter().zip(&coeff_trees) {
            out.put_f64(slot.precision)?;
            out.put_u32(COEFF_RADIUS as u32)?;
            write_tree(&mut out, tree)?;
            let len = tree.encoded_len(&slot.symbols)?;
            out.put_size(len)?;
            out.put_with(len, |buf| tree.encode(&slot.symbols, buf))?;
            out.put_u32(slot.unpredictable.len() as u32)?;
            out.put_f32s(&slot.unpredictable)?;
        }
        trace!(offset = out.len(), "coefficients written");

        out.put_size(blocks.unpredictable.len())?;
        out.put_size(counts_packed.len())?;
        out.put_bytes(&counts_packed)?;
        out.put_f32s(&blocks.unpredictable)?;
        out.put_size(sizes_packed.len())?;
        out.put_bytes(&sizes_packed)?;
        trace!(offset = out.len(), "auxiliary arrays written");

        for (block_symbols, &size) in blocks.symbols.chunks_exact(BLOCK_ELEMENTS).zip(&chunk_sizes) {
            out.put_with(size as usize, |buf| main_tree.encode(block_symbols, buf))?;
        }

        // ── Seal: checksum the payload and patch it into the header ────────
        let mut header = header;
        header.checksum = payload_checksum(out.as_slice());
        out.patch(0, &header.to_bytes())?;

        debug!(
            bytes = out.len(),
            bound = limit,
            ratio = (dims.len() * 4) as f64 / out.len() as f64,
            "container sealed"
        );
        let mut bytes = out.into_inner();
        bytes.shrink_to_fit();
        Ok(bytes)
    }
}

fn write_tree(out: &mut BoundedWriter, tree: &HuffmanTree) -> Result<()> {
    let len = tree.serialized_len();
    out.put_u32(len as u32)?;
    out.put_u32(tree.node_count() as u32)?;
    out.put_with(len, |buf| {
        let start = buf.len();
        tree.write_to(buf);
        Ok(buf.len() - start)
    })
}

fn quantize_blocks(
    volume: &[f32],
    grid: &BlockGrid,
    kinds: &[PredictorKind],
    coeffs: &[RegressionCoeffs],
    quant: &SampleQuantizer,
) -> Result<QuantizedBlocks> {
    let num_blocks = grid.num_blocks();
    let total = num_blocks.checked_mul(BLOCK_ELEMENTS).ok_or(SzError::AllocationFailed {
        requested_bytes: usize::MAX,
    })?;
    let mut symbols = crate::error::try_filled(total, 0i32)?;
    let mut counts = crate::error::try_with_capacity(num_blocks)?;
    let mut unpredictable = crate::error::try_with_capacity(total)?;

    for ((block, kind), block_symbols) in grid
        .blocks()
        .zip(kinds)
        .zip(symbols.chunks_exact_mut(BLOCK_ELEMENTS))
    {
        let escaped = match kind {
            PredictorKind::Regression => quant.encode_regression(
                &grid.gather(volume, block),
                &coeffs[block.index],
                block_symbols,
                &mut unpredictable,
            ),
            PredictorKind::Lorenzo => {
                let mut staged = HaloBlock::load(volume, grid, block);
                quant.encode_lorenzo(&mut staged, block_symbols, &mut unpredictable)
            }
        };
        counts.push(escaped as i32);
    }

    Ok(QuantizedBlocks {
        symbols,
        unpredictable,
        counts,
    })
}

/// Compress `volume` with a one-off [`Writer`].
pub fn compress(
    volume: &[f32],
    dims: Dims,
    precision: f64,
    config: &SzConfig,
    codec: Arc<dyn Codec>,
) -> Result<Vec<u8>> {
    Writer::new(codec, config.clone())?.compress(volume, dims, precision)
}
