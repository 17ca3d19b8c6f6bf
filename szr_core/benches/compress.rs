use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use szr_codecs::ZstdCodec;
use szr_core::{Codec, Dims, Reader, SzConfig, Writer};

fn field(dims: Dims) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims.len());
    for x in 0..dims.r1 {
        for y in 0..dims.r2 {
            for z in 0..dims.r3 {
                let (xf, yf, zf) = (x as f32, y as f32, z as f32);
                out.push((xf * 0.05).sin() * (yf * 0.07).cos() * 40.0 + zf * 0.3);
            }
        }
    }
    out
}

fn bench_compress(c: &mut Criterion) {
    let dims = Dims::new(64, 64, 64).unwrap();
    let volume = field(dims);
    let codec: Arc<dyn Codec> = Arc::new(ZstdCodec::default());

    let mut group = c.benchmark_group("compress");
    group.throughput(Throughput::Bytes((volume.len() * 4) as u64));
    for precision in [1e-1, 1e-3] {
        let writer = Writer::new(codec.clone(), SzConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(precision), &precision, |b, &p| {
            b.iter(|| writer.compress(black_box(&volume), dims, p).unwrap())
        });
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let dims = Dims::new(64, 64, 64).unwrap();
    let volume = field(dims);
    let codec = ZstdCodec::default();
    let bytes = Writer::new(Arc::new(ZstdCodec::default()), SzConfig::default())
        .unwrap()
        .compress(&volume, dims, 1e-3)
        .unwrap();

    let mut group = c.benchmark_group("decompress");
    group.throughput(Throughput::Bytes((volume.len() * 4) as u64));
    group.bench_function("full", |b| {
        b.iter(|| {
            let reader = Reader::parse(black_box(&bytes), &codec).unwrap();
            reader.decompress().unwrap()
        })
    });
    group.finish();

    let reader = Reader::parse(&bytes, &codec).unwrap();
    c.bench_function("read_block", |b| {
        let mut index = 0;
        b.iter(|| {
            index = (index + 97) % reader.num_blocks();
            reader.read_block(black_box(index)).unwrap()
        })
    });
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
