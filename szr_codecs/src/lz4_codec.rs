use szr_core::codec::Codec;
use szr_core::format::CODEC_LZ4;

/// LZ4 block codec.
///
/// Fastest decode of the bundled codecs. The raw length is recorded by the
/// container, so blocks are stored without lz4_flex's size prefix.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> u16 {
        CODEC_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(raw))
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let raw = lz4_flex::block::decompress(compressed, raw_len)
            .map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))?;
        Ok(raw)
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(raw_len)
    }
}
