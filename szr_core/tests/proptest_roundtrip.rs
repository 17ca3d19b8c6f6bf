use std::sync::Arc;

use proptest::prelude::*;
use szr_codecs::{Lz4Codec, ZstdCodec};
use szr_core::format::payload_checksum;
use szr_core::{decompress, Codec, Dims, Header, Reader, SizeType, SzConfig, Writer, HEADER_SIZE};

/// Dimensions small enough to keep each case fast, with clipped edges.
fn dims_strategy() -> impl Strategy<Value = Dims> {
    (1usize..14, 1usize..14, 1usize..14).prop_map(|(a, b, c)| Dims::new(a, b, c).unwrap())
}

/// A volume mixing smooth structure, noise, and the occasional outlier.
fn volume_strategy() -> impl Strategy<Value = (Dims, Vec<f32>)> {
    dims_strategy().prop_flat_map(|dims| {
        let len = dims.len();
        (
            Just(dims),
            prop::collection::vec(
                prop_oneof![
                    8 => -100.0f32..100.0f32,
                    1 => Just(0.0f32),
                    1 => -1.0e20f32..1.0e20f32,
                ],
                len..=len,
            ),
        )
    })
}

fn config_strategy() -> impl Strategy<Value = SzConfig> {
    (
        prop_oneof![Just(0u32), Just(4), Just(32), Just(1024)],
        1usize..200,
        prop_oneof![Just(SizeType::U32), Just(SizeType::U64)],
    )
        .prop_map(|(quantization_intervals, sample_distance, size_type)| SzConfig {
            quantization_intervals,
            sample_distance,
            size_type,
            ..SzConfig::default()
        })
}

fn within_bound(a: f32, b: f32, precision: f64) -> bool {
    a.to_bits() == b.to_bits() || ((a - b) as f64).abs() <= precision
}

// Property 1: every decoded sample honors the error bound or is exact
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_error_bound_holds(
        (dims, volume) in volume_strategy(),
        precision in prop_oneof![Just(1e-4f64), Just(1e-2), Just(0.5), Just(10.0)],
        config in config_strategy(),
    ) {
        let codec: Arc<dyn Codec> = Arc::new(ZstdCodec::default());
        let bytes = Writer::new(codec.clone(), config).unwrap().compress(&volume, dims, precision).unwrap();
        let (decoded_dims, decoded) = decompress(&bytes, codec.as_ref()).unwrap();
        prop_assert_eq!(decoded_dims, dims);
        for (i, (&a, &b)) in volume.iter().zip(&decoded).enumerate() {
            prop_assert!(
                within_bound(a, b, precision),
                "sample {}: original {}, decoded {}, precision {}", i, a, b, precision
            );
        }
    }
}

// Property 2: single-block reads agree with the full decode
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_read_block_agrees_with_decompress(
        (dims, volume) in volume_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        let codec = Lz4Codec;
        let bytes = Writer::new(Arc::new(Lz4Codec), SzConfig::default())
            .unwrap()
            .compress(&volume, dims, 1e-2)
            .unwrap();
        let reader = Reader::parse(&bytes, &codec).unwrap();
        let full = reader.decompress().unwrap();

        let index = pick.index(reader.num_blocks());
        let block = reader.read_block(index).unwrap();
        let (nby, nbz) = (dims.r2.div_ceil(6), dims.r3.div_ceil(6));
        let (bi, bj, bk) = (index / (nby * nbz), (index / nbz) % nby, index % nbz);
        for ii in 0..6 {
            for jj in 0..6 {
                for kk in 0..6 {
                    let (x, y, z) = (bi * 6 + ii, bj * 6 + jj, bk * 6 + kk);
                    if x < dims.r1 && y < dims.r2 && z < dims.r3 {
                        let got = block[(ii * 6 + jj) * 6 + kk];
                        let want = full[dims.offset(x, y, z)];
                        prop_assert_eq!(got.to_bits(), want.to_bits());
                    }
                }
            }
        }
    }
}

// Property 3: a corrupted payload is rejected or decoded, never a panic
proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_corruption_never_panics(
        (dims, volume) in volume_strategy(),
        pick in any::<prop::sample::Index>(),
        flip in 1u8..=255,
        reseal in any::<bool>(),
    ) {
        let codec = ZstdCodec::default();
        let mut bytes = Writer::new(Arc::new(ZstdCodec::default()), SzConfig::default())
            .unwrap()
            .compress(&volume, dims, 1e-2)
            .unwrap();
        let at = HEADER_SIZE + pick.index(bytes.len() - HEADER_SIZE);
        bytes[at] ^= flip;
        if reseal {
            let mut header = Header::from_bytes(&bytes).unwrap();
            header.checksum = payload_checksum(&bytes);
            bytes[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        }

        match Reader::parse(&bytes, &codec) {
            Ok(reader) => {
                prop_assert!(reseal, "checksum should catch an unsealed flip");
                let _ = reader.decompress();
            }
            Err(_) => {}
        }
    }
}

// Property 4: a constant volume of any shape decodes exactly with no escapes
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_constant_volume_needs_no_escapes(
        (r1, r2, r3) in (1usize..20, 1usize..20, 1usize..20),
        value in prop_oneof![
            4 => -1.0e6f32..1.0e6f32,
            1 => Just(0.0f32),
            1 => -1.0f32..1.0f32,
        ],
        precision in prop_oneof![Just(1e-6f64), Just(1e-3), Just(0.5)],
    ) {
        let dims = Dims::new(r1, r2, r3).unwrap();
        let volume = vec![value; dims.len()];
        let codec = ZstdCodec::default();
        let bytes = Writer::new(Arc::new(ZstdCodec::default()), SzConfig::default())
            .unwrap()
            .compress(&volume, dims, precision)
            .unwrap();
        let reader = Reader::parse(&bytes, &codec).unwrap();
        prop_assert_eq!(reader.unpredictable_count(), 0);
        let decoded = reader.decompress().unwrap();
        prop_assert!(decoded.iter().all(|&v| v == value));
    }
}
