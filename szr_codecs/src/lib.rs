mod deflate_codec;
mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use deflate_codec::DeflateCodec;
pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;
use szr_core::format::{CODEC_DEFLATE, CODEC_LZ4, CODEC_PASSTHROUGH, CODEC_ZSTD};
use szr_core::Codec;

/// Resolve a codec from its on-disk `codec_id`.
///
/// Called by the CLI when opening an existing container, so the reader can
/// be initialized with the right codec automatically.
pub fn codec_by_id(id: u16) -> anyhow::Result<Arc<dyn Codec>> {
    match id {
        CODEC_PASSTHROUGH => Ok(Arc::new(PassThroughCodec)),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec::default())),
        CODEC_LZ4 => Ok(Arc::new(Lz4Codec)),
        CODEC_DEFLATE => Ok(Arc::new(DeflateCodec::default())),
        _ => anyhow::bail!(
            "unknown codec id {}; supported: 0 (passthrough), 1 (zstd), 2 (lz4), 3 (deflate)",
            id
        ),
    }
}

/// Resolve a codec from its CLI name.
pub fn codec_by_name(name: &str) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "passthrough" | "none" => Ok(Arc::new(PassThroughCodec)),
        "zstd" => Ok(Arc::new(ZstdCodec::default())),
        "lz4" => Ok(Arc::new(Lz4Codec)),
        "deflate" => Ok(Arc::new(DeflateCodec::default())),
        _ => anyhow::bail!("unknown codec '{}'; choose passthrough, zstd, lz4 or deflate", name),
    }
}
