use crate::error::{Result, SzError};

/// Compressor for the container's two auxiliary per-block arrays
/// (unpredictable counts and encoded chunk sizes).
///
/// Each `Codec` implementation:
/// - Is identified by a stable numeric `id()` stored in the container header.
/// - Must be lossless: the arrays locate block chunks and escape runs, so
///   the decoder needs them back exactly.
/// - Must report an honest worst case in `max_compressed_len`, which feeds
///   the container's up-front size bound.
pub trait Codec: Send + Sync {
    /// Stable codec ID stored in the container header.
    fn id(&self) -> u16;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// `raw_len` is the exact decompressed size recorded by the caller.
    fn decompress(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>>;

    /// Upper bound on `compress(raw).len()` for any `raw` of `raw_len` bytes.
    fn max_compressed_len(&self, raw_len: usize) -> usize;
}

fn checked_compress(codec: &dyn Codec, raw: &[u8]) -> Result<Vec<u8>> {
    let out = codec.compress(raw).map_err(SzError::Codec)?;
    if out.len() > codec.max_compressed_len(raw.len()) {
        return Err(SzError::Internal(format!(
            "codec {} produced {} bytes, above its declared bound {}",
            codec.name(),
            out.len(),
            codec.max_compressed_len(raw.len())
        )));
    }
    Ok(out)
}

fn checked_decompress(codec: &dyn Codec, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
    let out = codec
        .decompress(compressed, raw_len)
        .map_err(SzError::Codec)?;
    if out.len() != raw_len {
        return Err(SzError::Codec(anyhow::anyhow!(
            "codec {} returned {} bytes, expected {raw_len}",
            codec.name(),
            out.len()
        )));
    }
    Ok(out)
}

/// Serialize per-block unpredictable counts (i32 LE) and compress them.
pub fn compress_counts(codec: &dyn Codec, counts: &[i32]) -> Result<Vec<u8>> {
    let mut raw: Vec<u8> = crate::error::try_with_capacity(counts.len() * 4)?;
    raw.extend(counts.iter().flat_map(|c| c.to_le_bytes()));
    checked_compress(codec, &raw)
}

pub fn decompress_counts(codec: &dyn Codec, compressed: &[u8], n: usize) -> Result<Vec<i32>> {
    let mut counts = crate::error::try_with_capacity(n)?;
    let raw = checked_decompress(codec, compressed, n * 4)?;
    counts.extend(
        raw.chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
    Ok(counts)
}

/// Serialize per-block chunk byte sizes (u16 LE) and compress them.
pub fn compress_chunk_sizes(codec: &dyn Codec, sizes: &[u16]) -> Result<Vec<u8>> {
    let mut raw: Vec<u8> = crate::error::try_with_capacity(sizes.len() * 2)?;
    raw.extend(sizes.iter().flat_map(|s| s.to_le_bytes()));
    checked_compress(codec, &raw)
}

pub fn decompress_chunk_sizes(codec: &dyn Codec, compressed: &[u8], n: usize) -> Result<Vec<u16>> {
    let mut sizes = crate::error::try_with_capacity(n)?;
    let raw = checked_decompress(codec, compressed, n * 2)?;
    sizes.extend(raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])));
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stores the input unchanged.
    struct Identity;

    impl Codec for Identity {
        fn id(&self) -> u16 {
            0
        }
        fn name(&self) -> &'static str {
            "identity"
        }
        fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(raw.to_vec())
        }
        fn decompress(&self, compressed: &[u8], _raw_len: usize) -> anyhow::Result<Vec<u8>> {
            Ok(compressed.to_vec())
        }
        fn max_compressed_len(&self, raw_len: usize) -> usize {
            raw_len
        }
    }

    #[test]
    fn test_counts_roundtrip() {
        let counts = vec![0, 3, 216, 0, 7];
        let packed = compress_counts(&Identity, &counts).unwrap();
        assert_eq!(packed.len(), 20);
        assert_eq!(&packed[4..8], &3i32.to_le_bytes());
        assert_eq!(decompress_counts(&Identity, &packed, 5).unwrap(), counts);
    }

    #[test]
    fn test_chunk_sizes_length_checked() {
        let packed = compress_chunk_sizes(&Identity, &[12, 1728]).unwrap();
        assert_eq!(decompress_chunk_sizes(&Identity, &packed, 2).unwrap(), vec![12, 1728]);
        assert!(matches!(
            decompress_chunk_sizes(&Identity, &packed, 3),
            Err(SzError::Codec(_))
        ));
    }

    #[test]
    fn test_oversized_block_count_reports_allocation_failure() {
        assert!(matches!(
            decompress_counts(&Identity, &[], usize::MAX / 2),
            Err(SzError::AllocationFailed { .. })
        ));
        assert!(matches!(
            decompress_chunk_sizes(&Identity, &[], usize::MAX / 2),
            Err(SzError::AllocationFailed { .. })
        ));
    }
}
