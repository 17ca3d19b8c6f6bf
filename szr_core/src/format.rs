use crate::config::SizeType;
use crate::error::{Result, SzError};
use crate::partition::{Dims, BLOCK_ELEMENTS};

/// Magic bytes opening every SZRB container.
pub const MAGIC: &[u8; 4] = b"SZRB";

/// Container format version, major.minor.patch.
pub const VERSION: [u8; 3] = [1, 0, 0];

/// Fixed size of the container header in bytes.
///   magic[4] + version[3] + flags:u8 + codec_id:u16 + reserved[6]
///   + r1:u64 + r2:u64 + r3:u64 + checksum:u64
///   = 4 + 3 + 1 + 2 + 6 + 24 + 8 = 48
pub const HEADER_SIZE: usize = 48;

/// Offset of the payload checksum within the header.
const CHECKSUM_OFFSET: usize = 40;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Size-typed fields are 8 bytes wide (4 otherwise).
pub const FLAG_SIZE_U64: u8 = 1 << 0;

// ── Codec IDs ──────────────────────────────────────────────────────────────

pub const CODEC_PASSTHROUGH: u16 = 0;
pub const CODEC_ZSTD: u16 = 1;
pub const CODEC_LZ4: u16 = 2;
pub const CODEC_DEFLATE: u16 = 3;

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 48-byte container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: [u8; 3],
    pub flags: u8,
    pub codec_id: u16,
    pub dims: Dims,
    /// xxhash3-64 of every byte after the header.
    pub checksum: u64,
}

impl Header {
    pub fn new(dims: Dims, codec_id: u16, size_type: SizeType) -> Self {
        let flags = match size_type {
            SizeType::U64 => FLAG_SIZE_U64,
            SizeType::U32 => 0,
        };
        Self {
            version: VERSION,
            flags,
            codec_id,
            dims,
            checksum: 0,
        }
    }

    pub fn size_type(&self) -> SizeType {
        if self.flags & FLAG_SIZE_U64 != 0 {
            SizeType::U64
        } else {
            SizeType::U32
        }
    }

    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(MAGIC);
        buf[4..7].copy_from_slice(&self.version);
        buf[7] = self.flags;
        buf[8..10].copy_from_slice(&self.codec_id.to_be_bytes());
        // reserved[6] stays zero
        buf[16..24].copy_from_slice(&(self.dims.r1 as u64).to_be_bytes());
        buf[24..32].copy_from_slice(&(self.dims.r2 as u64).to_be_bytes());
        buf[32..40].copy_from_slice(&(self.dims.r3 as u64).to_be_bytes());
        buf[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Deserialize from the start of `bytes`, checking magic and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let buf: &[u8; HEADER_SIZE] = bytes
            .get(..HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(SzError::Truncated {
                needed: HEADER_SIZE,
                offset: 0,
                available: bytes.len(),
            })?;
        if &buf[..4] != MAGIC {
            return Err(SzError::corrupted("invalid magic bytes, not an SZRB container", 0));
        }
        let version = [buf[4], buf[5], buf[6]];
        if version[0] != VERSION[0] {
            return Err(SzError::UnsupportedVersion(version[0], version[1], version[2]));
        }
        if buf[7] & !FLAG_SIZE_U64 != 0 {
            return Err(SzError::corrupted(format!("unknown flags {:#04x}", buf[7]), 7));
        }
        let be_u64 = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&buf[at..at + 8]);
            u64::from_be_bytes(word)
        };
        let extent = |at: usize| {
            usize::try_from(be_u64(at))
                .map_err(|_| SzError::corrupted("dimension exceeds address space", at))
        };
        let dims = Dims::new(extent(16)?, extent(24)?, extent(32)?)
            .map_err(|e| SzError::corrupted(e.to_string(), 16))?;
        Ok(Self {
            version,
            flags: buf[7],
            codec_id: u16::from_be_bytes([buf[8], buf[9]]),
            dims,
            checksum: be_u64(CHECKSUM_OFFSET),
        })
    }
}

/// Checksum over the payload that follows the header.
pub fn payload_checksum(container: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(container.get(HEADER_SIZE..).unwrap_or_default())
}

// ── Byte-level I/O ─────────────────────────────────────────────────────────

/// Append-only output with a hard capacity limit fixed up front.
///
/// Integers go out big-endian; floats go out little-endian IEEE-754.
#[derive(Debug)]
pub struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
    size_type: SizeType,
}

impl BoundedWriter {
    pub fn with_limit(limit: usize, size_type: SizeType) -> Result<Self> {
        Ok(Self {
            buf: crate::error::try_with_capacity(limit)?,
            limit,
            size_type,
        })
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, additional: usize) -> Result<()> {
        if self.buf.len() + additional > self.limit {
            return Err(SzError::Internal(format!(
                "container write of {additional} bytes at {} exceeds the {}-byte bound",
                self.buf.len(),
                self.limit
            )));
        }
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.put_bytes(&[v])
    }

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.put_bytes(&v.to_be_bytes())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<()> {
        self.put_bytes(&v.to_be_bytes())
    }

    pub fn put_f32(&mut self, v: f32) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_f32s(&mut self, values: &[f32]) -> Result<()> {
        self.ensure(values.len() * 4)?;
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    /// Write a size-typed field.
    pub fn put_size(&mut self, v: usize) -> Result<()> {
        let v = v as u64;
        if v > self.size_type.max_value() {
            return Err(SzError::InvalidConfig(format!(
                "value {v} does not fit a {}-byte size field",
                self.size_type.width()
            )));
        }
        match self.size_type {
            SizeType::U32 => self.put_u32(v as u32),
            SizeType::U64 => self.put_bytes(&v.to_be_bytes()),
        }
    }

    /// Let `f` append exactly `len` bytes directly to the buffer.
    pub fn put_with(
        &mut self,
        len: usize,
        f: impl FnOnce(&mut Vec<u8>) -> Result<usize>,
    ) -> Result<()> {
        self.ensure(len)?;
        let written = f(&mut self.buf)?;
        if written != len {
            return Err(SzError::Internal(format!(
                "section announced {len} bytes but wrote {written}"
            )));
        }
        Ok(())
    }

    /// Overwrite already-written bytes at `offset`.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let dst = self
            .buf
            .get_mut(offset..offset + bytes.len())
            .ok_or_else(|| SzError::Internal(format!("patch at {offset} is out of range")))?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked cursor over a container.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    size_type: SizeType,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], pos: usize, size_type: SizeType) -> Self {
        Self {
            bytes,
            pos,
            size_type,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(SzError::Truncated {
                needed: n,
                offset: self.pos,
                available: self.remaining(),
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.array().map(i32::from_be_bytes)
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.array().map(f32::from_le_bytes)
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.array().map(f64::from_le_bytes)
    }

    /// Read `count` little-endian floats.
    pub fn f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let at = self.pos;
        let len = count
            .checked_mul(4)
            .ok_or_else(|| SzError::corrupted(format!("float count {count} overflows"), at))?;
        let raw = self.take(len)?;
        let mut out = crate::error::try_with_capacity(count)?;
        out.extend(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        Ok(out)
    }

    /// Read a size-typed field as a `usize`.
    pub fn size(&mut self) -> Result<usize> {
        let at = self.pos;
        let v = match self.size_type {
            SizeType::U32 => self.u32()? as u64,
            SizeType::U64 => self.array().map(u64::from_be_bytes)?,
        };
        usize::try_from(v).map_err(|_| SzError::corrupted(format!("size field {v} overflows"), at))
    }

    /// Read a size-typed length and the bytes it announces.
    pub fn sized_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.size()?;
        self.take(len)
    }
}

// ── Size upper bound ────────────────────────────────────────────────────────

/// Everything the worst-case container size depends on. Filled in once the
/// trees are built and the auxiliary arrays are known.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerBound {
    pub size_type: SizeType,
    pub num_blocks: usize,
    pub main_tree_len: usize,
    /// Longest main codeword, in bits.
    pub main_max_code_len: u32,
    /// Per-slot serialized tree sizes; ignored when there are no
    /// regression blocks.
    pub coeff_tree_lens: [usize; 4],
    pub coeff_max_code_lens: [u32; 4],
    pub regression_blocks: usize,
    pub unpredictable: usize,
    /// `Codec::max_compressed_len` of the unpredictable-count array.
    pub counts_max_len: usize,
    /// `Codec::max_compressed_len` of the chunk-size array.
    pub chunk_sizes_max_len: usize,
}

fn stream_bytes(symbols: usize, max_code_len: u32) -> usize {
    symbols
        .saturating_mul(max_code_len.max(1) as usize)
        .div_ceil(8)
}

/// Worst-case byte size of a container.
pub fn max_container_size(b: &ContainerBound) -> usize {
    let w = b.size_type.width();
    let fixed = HEADER_SIZE
        + w // element count
        + 4 // block size
        + 8 // precision
        + 4 // intervals
        + 8 // main tree size + node count
        + 5 // mean flag + mean
        + w // unpredictable total
        + w // counts array length
        + w; // chunk-size array length

    let coefficients = if b.regression_blocks == 0 {
        0
    } else {
        (0..4)
            .map(|slot| {
                8 + 4 + 8 + w + 4
                    + b.coeff_tree_lens[slot]
                    + stream_bytes(b.regression_blocks, b.coeff_max_code_lens[slot])
                    + b.regression_blocks.saturating_mul(4)
            })
            .fold(0usize, usize::saturating_add)
    };

    let per_block = stream_bytes(BLOCK_ELEMENTS, b.main_max_code_len);
    fixed
        .saturating_add(b.main_tree_len)
        .saturating_add(b.num_blocks.div_ceil(8))
        .saturating_add(coefficients)
        .saturating_add(b.counts_max_len)
        .saturating_add(b.unpredictable.saturating_mul(4))
        .saturating_add(b.chunk_sizes_max_len)
        .saturating_add(b.num_blocks.saturating_mul(per_block))
}
