use anyhow::Context;
use szr_core::codec::Codec;
use szr_core::format::CODEC_ZSTD;

/// Zstandard codec, the default for new containers.
///
/// The per-block count arrays are long runs of small integers, which zstd
/// shrinks well even at low levels.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn id(&self) -> u16 {
        CODEC_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let compressed = zstd::bulk::compress(raw, self.level)?;
        Ok(compressed)
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let raw = zstd::bulk::decompress(compressed, raw_len)
            .with_context(|| format!("zstd decompress of {raw_len}-byte array"))?;
        Ok(raw)
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        zstd::zstd_safe::compress_bound(raw_len)
    }
}
