use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use szr_core::codec::Codec;
use szr_core::format::CODEC_DEFLATE;

/// Raw deflate codec (no zlib or gzip framing).
pub struct DeflateCodec {
    pub level: Compression,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Codec for DeflateCodec {
    fn id(&self) -> u16 {
        CODEC_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut enc = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), self.level);
        enc.write_all(raw)?;
        Ok(enc.finish()?)
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(raw_len);
        // One byte past `raw_len` is enough to detect an oversized stream.
        DeflateDecoder::new(compressed)
            .take(raw_len as u64 + 1)
            .read_to_end(&mut raw)?;
        if raw.len() != raw_len {
            anyhow::bail!("deflate stream holds {} bytes, expected {}", raw.len(), raw_len);
        }
        Ok(raw)
    }

    /// Stored-block worst case, with framing and alignment slack for
    /// blocks as small as 8 KiB.
    fn max_compressed_len(&self, raw_len: usize) -> usize {
        raw_len + (raw_len / 8_192 + 1) * 6 + 16
    }
}
