use tracing::debug;

use crate::bitmap;
use crate::codec::{self, Codec};
use crate::coefficients::{self, SlotStream, COEFF_CAPACITY, COEFF_STATE_NUM};
use crate::config::SizeType;
use crate::error::{Result, SzError};
use crate::format::{payload_checksum, ByteReader, Header, HEADER_SIZE};
use crate::huffman::HuffmanTree;
use crate::partition::{BlockGrid, Dims, BLOCK_ELEMENTS, BLOCK_SIZE};
use crate::quantizer::SampleQuantizer;
use crate::regression::RegressionCoeffs;
use crate::selector::PredictorKind;

/// Byte size of each container section, header included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSizes {
    pub header: usize,
    /// Element count through the main tree, plus the mean flag and value.
    pub metadata: usize,
    pub indicator: usize,
    pub coefficients: usize,
    /// Unpredictable total and the compressed count array.
    pub unpredictable_counts: usize,
    pub unpredictable_values: usize,
    pub chunk_sizes: usize,
    pub chunks: usize,
}

impl SectionSizes {
    pub fn total(&self) -> usize {
        self.header
            + self.metadata
            + self.indicator
            + self.coefficients
            + self.unpredictable_counts
            + self.unpredictable_values
            + self.chunk_sizes
            + self.chunks
    }
}

/// Random-access decoder over an in-memory SZRB container.
///
/// # Parse sequence
/// 1. Decode the 48-byte header (magic, version, codec id) and verify the
///    payload checksum.
/// 2. Walk every section, checking each length prefix against the bytes
///    actually present; the last block chunk must end exactly at the end of
///    the buffer.
/// 3. Rebuild the regression coefficients and the per-block offset tables.
///
/// # Access pattern
/// [`read_block`](Self::read_block) decodes one block from its own chunk and
/// its own run of unpredictable values. No other block is touched.
pub struct Reader<'a> {
    bytes: &'a [u8],
    header: Header,
    grid: BlockGrid,
    precision: f64,
    intervals: u32,
    tree: HuffmanTree,
    quant: SampleQuantizer,
    kinds: Vec<PredictorKind>,
    /// Reconstructed coefficients, indexed by block (Lorenzo blocks hold
    /// zeros).
    coeffs: Vec<RegressionCoeffs>,
    regression_blocks: usize,
    /// Index of each block's first unpredictable value; one extra entry.
    unpred_starts: Vec<usize>,
    unpred_offset: usize,
    /// Byte offset of each block's chunk; one extra entry.
    chunk_starts: Vec<usize>,
    sections: SectionSizes,
}

fn corrupt_at(offset: usize) -> impl Fn(SzError) -> SzError {
    move |e| match e {
        SzError::Huffman(m) | SzError::Internal(m) => SzError::corrupted(m, offset),
        other => other,
    }
}

impl<'a> Reader<'a> {
    /// Parse and validate a container.
    ///
    /// `codec` must match the codec id stored in the header. Use
    /// `szr_codecs::codec_by_id(Header::from_bytes(bytes)?.codec_id)` when
    /// the codec is not known up front.
    pub fn parse(bytes: &'a [u8], codec: &dyn Codec) -> Result<Self> {
        // ── Header ──────────────────────────────────────────────────────────
        let header = Header::from_bytes(bytes)?;
        if header.codec_id != codec.id() {
            return Err(SzError::CodecMismatch {
                expected: codec.id(),
                found: header.codec_id,
            });
        }
        let actual = payload_checksum(bytes);
        if actual != header.checksum {
            return Err(SzError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let dims = header.dims;
        let grid = BlockGrid::new(dims);
        let num_blocks = grid.num_blocks();
        let mut r = ByteReader::new(bytes, HEADER_SIZE, header.size_type());
        let mut sections = SectionSizes {
            header: HEADER_SIZE,
            ..SectionSizes::default()
        };

        // ── Metadata ────────────────────────────────────────────────────────
        let at = r.position();
        let elements = r.size()?;
        if elements != dims.len() {
            return Err(SzError::corrupted(
                format!("element count {elements} does not match {}x{}x{}", dims.r1, dims.r2, dims.r3),
                at,
            ));
        }
        let at = r.position();
        let block_size = r.i32()?;
        if block_size != BLOCK_SIZE as i32 {
            return Err(SzError::corrupted(format!("unsupported block size {block_size}"), at));
        }
        let at = r.position();
        let precision = r.f64()?;
        if !(precision.is_finite() && precision > 0.0) {
            return Err(SzError::corrupted(format!("invalid precision {precision}"), at));
        }
        let at = r.position();
        let intervals = r.u32()?;
        if intervals < 4 || intervals % 2 != 0 || intervals > i32::MAX as u32 / 2 {
            return Err(SzError::corrupted(format!("invalid interval count {intervals}"), at));
        }
        let tree = read_tree(&mut r, 2 * intervals as usize)?;

        let at = r.position();
        let mean = match r.u8()? {
            0 => {
                r.f32()?;
                None
            }
            1 => Some(r.f32()?),
            flag => return Err(SzError::corrupted(format!("invalid mean flag {flag}"), at)),
        };
        sections.metadata = r.position() - HEADER_SIZE;

        // ── Indicator ───────────────────────────────────────────────────────
        let start = r.position();
        let flags = bitmap::unpack(r.take(bitmap::packed_len(num_blocks))?, num_blocks)?;
        let mut kinds: Vec<PredictorKind> = crate::error::try_with_capacity(num_blocks)?;
        kinds.extend(flags.into_iter().map(PredictorKind::from_bit));
        let regression_blocks = kinds
            .iter()
            .filter(|&&k| k == PredictorKind::Regression)
            .count();
        sections.indicator = r.position() - start;

        // ── Coefficients ────────────────────────────────────────────────────
        let start = r.position();
        let mut coeffs = crate::error::try_filled(num_blocks, RegressionCoeffs::default())?;
        if regression_blocks > 0 {
            let mut slots: [SlotStream; 4] = Default::default();
            let mut radius = [0i32; 4];
            for (slot, stream) in slots.iter_mut().enumerate() {
                let at = r.position();
                stream.precision = r.f64()?;
                if !(stream.precision.is_finite() && stream.precision > 0.0) {
                    return Err(SzError::corrupted("invalid coefficient precision", at));
                }
                let at = r.position();
                let rad = r.u32()?;
                if rad == 0 || rad > COEFF_CAPACITY as u32 {
                    return Err(SzError::corrupted(format!("invalid coefficient radius {rad}"), at));
                }
                radius[slot] = rad as i32;
                let slot_tree = read_tree(&mut r, COEFF_STATE_NUM)?;
                let at = r.position();
                let encoded = r.sized_bytes()?;
                stream.symbols = crate::error::try_filled(regression_blocks, 0)?;
                slot_tree
                    .decode(encoded, &mut stream.symbols)
                    .map_err(corrupt_at(at))?;
                let count = r.u32()? as usize;
                stream.unpredictable = r.f32s(count)?;
            }
            let at = r.position();
            let rebuilt = coefficients::reconstruct(&slots, radius, regression_blocks)
                .map_err(corrupt_at(at))?;
            let mut rebuilt = rebuilt.into_iter();
            for (kind, c) in kinds.iter().zip(coeffs.iter_mut()) {
                if *kind == PredictorKind::Regression {
                    if let Some(q) = rebuilt.next() {
                        *c = q;
                    }
                }
            }
        }
        sections.coefficients = r.position() - start;

        // ── Unpredictable values ────────────────────────────────────────────
        let start = r.position();
        let total_unpred = r.size()?;
        let at = r.position();
        let counts = codec::decompress_counts(codec, r.sized_bytes()?, num_blocks)
            .map_err(corrupt_at(at))?;
        sections.unpredictable_counts = r.position() - start;
        let mut unpred_starts = crate::error::try_with_capacity(num_blocks + 1)?;
        let mut running = 0usize;
        unpred_starts.push(0);
        for (b, &count) in counts.iter().enumerate() {
            if !(0..=BLOCK_ELEMENTS as i32).contains(&count) {
                return Err(SzError::corrupted(
                    format!("block {b} claims {count} unpredictable values"),
                    at,
                ));
            }
            running += count as usize;
            unpred_starts.push(running);
        }
        if running != total_unpred {
            return Err(SzError::corrupted(
                format!("per-block counts sum to {running}, total says {total_unpred}"),
                at,
            ));
        }
        let unpred_offset = r.position();
        r.take(total_unpred.checked_mul(4).ok_or_else(|| {
            SzError::corrupted("unpredictable total overflows", unpred_offset)
        })?)?;
        sections.unpredictable_values = r.position() - unpred_offset;

        // ── Block chunks ────────────────────────────────────────────────────
        let start = r.position();
        let chunk_sizes = codec::decompress_chunk_sizes(codec, r.sized_bytes()?, num_blocks)
            .map_err(corrupt_at(start))?;
        sections.chunk_sizes = r.position() - start;
        let mut chunk_starts = crate::error::try_with_capacity(num_blocks + 1)?;
        let mut offset = r.position();
        chunk_starts.push(offset);
        for &size in &chunk_sizes {
            offset += size as usize;
            chunk_starts.push(offset);
        }
        if offset != bytes.len() {
            return Err(SzError::corrupted(
                format!(
                    "block chunks end at {offset} but the container holds {} bytes",
                    bytes.len()
                ),
                r.position(),
            ));
        }
        sections.chunks = offset - r.position();

        debug!(
            num_blocks,
            regression_blocks,
            intervals,
            use_mean = mean.is_some(),
            unpredictable = total_unpred,
            "container parsed"
        );

        Ok(Self {
            bytes,
            header,
            grid,
            precision,
            intervals,
            tree,
            quant: SampleQuantizer::new(precision, intervals, mean),
            kinds,
            coeffs,
            regression_blocks,
            unpred_starts,
            unpred_offset,
            chunk_starts,
            sections,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.header.dims
    }

    pub fn size_type(&self) -> SizeType {
        self.header.size_type()
    }

    pub fn precision(&self) -> f64 {
        self.precision
    }

    pub fn intervals(&self) -> u32 {
        self.intervals
    }

    /// The dense-value mean, when mean mode is on.
    pub fn mean(&self) -> Option<f32> {
        self.quant.mean
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.grid.num_blocks()
    }

    pub fn indicator(&self) -> &[PredictorKind] {
        &self.kinds
    }

    pub fn regression_blocks(&self) -> usize {
        self.regression_blocks
    }

    pub fn unpredictable_count(&self) -> usize {
        self.unpred_starts.last().copied().unwrap_or(0)
    }

    /// Escaped samples of block `index`.
    pub fn block_unpredictable_count(&self, index: usize) -> Option<usize> {
        Some(self.unpred_starts.get(index + 1)? - self.unpred_starts.get(index)?)
    }

    pub fn sections(&self) -> &SectionSizes {
        &self.sections
    }

    /// Compression ratio (raw f32 bytes / container bytes).
    pub fn ratio(&self) -> f64 {
        (self.dims().len() * 4) as f64 / self.bytes.len() as f64
    }

    /// Decode block `index` into local `(ii, jj, kk)` order. Clipped
    /// positions hold the values their repeated samples decoded to.
    pub fn read_block(&self, index: usize) -> Result<[f32; BLOCK_ELEMENTS]> {
        if index >= self.num_blocks() {
            return Err(SzError::BlockOutOfRange {
                index,
                total: self.num_blocks(),
            });
        }
        let chunk_at = self.chunk_starts[index];
        let chunk = &self.bytes[chunk_at..self.chunk_starts[index + 1]];
        let mut symbols = [0i32; BLOCK_ELEMENTS];
        self.tree
            .decode(chunk, &mut symbols)
            .map_err(corrupt_at(chunk_at))?;

        let first = self.unpred_starts[index];
        let count = self.unpred_starts[index + 1] - first;
        let mut raw = ByteReader::new(self.bytes, self.unpred_offset + first * 4, self.size_type());
        let unpredictable = raw.f32s(count)?;

        let decoded = match self.kinds[index] {
            PredictorKind::Regression => {
                self.quant
                    .decode_regression(&self.coeffs[index], &symbols, &unpredictable)
            }
            PredictorKind::Lorenzo => self.quant.decode_lorenzo(&symbols, &unpredictable),
        };
        decoded.map_err(corrupt_at(chunk_at))
    }

    /// Decode the whole volume.
    pub fn decompress(&self) -> Result<Vec<f32>> {
        let mut volume = crate::error::try_filled(self.dims().len(), 0f32)?;
        for block in self.grid.blocks() {
            let values = self.read_block(block.index)?;
            self.grid.scatter(&values, block, &mut volume);
        }
        Ok(volume)
    }
}

fn read_tree(r: &mut ByteReader<'_>, state_num: usize) -> Result<HuffmanTree> {
    let at = r.position();
    let len = r.u32()? as usize;
    let node_count = r.u32()? as usize;
    let bytes = r.take(len)?;
    HuffmanTree::from_bytes(bytes, node_count, state_num).map_err(corrupt_at(at))
}

/// Decode a container in one call.
pub fn decompress(bytes: &[u8], codec: &dyn Codec) -> Result<(Dims, Vec<f32>)> {
    let reader = Reader::parse(bytes, codec)?;
    Ok((reader.dims(), reader.decompress()?))
}
