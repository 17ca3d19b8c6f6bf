use szr_core::codec::Codec;
use szr_core::format::CODEC_PASSTHROUGH;

/// No-op codec: stores the auxiliary arrays verbatim.
///
/// Useful for inspecting containers by hand and for verifying the format
/// independently of any compressor.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn id(&self) -> u16 {
        CODEC_PASSTHROUGH
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        if compressed.len() != raw_len {
            anyhow::bail!(
                "passthrough array holds {} bytes, expected {}",
                compressed.len(),
                raw_len
            );
        }
        Ok(compressed.to_vec())
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        raw_len
    }
}
