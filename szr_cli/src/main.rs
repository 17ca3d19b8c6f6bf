use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use szr_codecs::{codec_by_id, codec_by_name, ZstdCodec};
use szr_core::{Codec, Dims, Header, PredictorKind, Reader, SizeType, SzConfig, Writer, BLOCK_SIZE};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "szr",
    about = "Error-bounded lossy compression of 3-D float volumes into SZRB containers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a raw little-endian f32 volume into an SZRB container
    Compress {
        /// Raw f32 volume ("-" reads stdin)
        input: PathBuf,
        /// Destination SZRB file
        output: PathBuf,
        /// Volume extents, slowest axis first (e.g. 100x500x500)
        #[arg(short, long, value_parser = parse_dims)]
        dims: Dims,
        /// Absolute error bound
        #[arg(short, long)]
        precision: f64,
        /// Codec for the auxiliary arrays: passthrough | zstd | lz4 | deflate
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Zstd compression level (only used with --codec zstd)
        #[arg(long, default_value_t = 3)]
        zstd_level: i32,
        /// Fixed quantization interval capacity (0 = auto-tune)
        #[arg(long)]
        intervals: Option<u32>,
        /// Write 4-byte size fields instead of 8-byte ones
        #[arg(long)]
        u32_sizes: bool,
        /// JSON file with a full compression config; flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print header metadata and section sizes
    Inspect {
        /// SZRB file to inspect
        file: PathBuf,
        /// Print per-block predictor and escape counts
        #[arg(long)]
        blocks: bool,
        /// Emit a JSON summary instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Decompress and check every sample against the original volume
    Verify {
        /// SZRB file
        file: PathBuf,
        /// Original raw f32 volume it was compressed from
        original: PathBuf,
    },
    /// Decode a single block by index
    ///
    /// Only the requested block's chunk and escape run are decoded.
    ReadBlock {
        /// SZRB file
        file: PathBuf,
        /// Zero-based block index
        #[arg(short, long)]
        index: usize,
        /// Write the block's raw f32 bytes to a file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_dims(s: &str) -> Result<Dims, String> {
    let parts: Vec<&str> = s.split(['x', 'X', ',']).collect();
    if parts.len() != 3 {
        return Err(format!("expected R1xR2xR3, got '{s}'"));
    }
    let mut r = [0usize; 3];
    for (slot, part) in r.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| format!("bad extent '{part}': {e}"))?;
    }
    Dims::new(r[0], r[1], r[2]).map_err(|e| e.to_string())
}

fn codec_from_name(name: &str, zstd_level: i32) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "zstd" | "z" => Ok(Arc::new(ZstdCodec::new(zstd_level))),
        other => codec_by_name(other),
    }
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if path.to_str() == Some("-") {
        io::stdin().lock().read_to_end(&mut bytes)?;
    } else {
        File::open(path)
            .with_context(|| format!("opening input file {:?}", path))?
            .read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

fn read_volume(path: &Path) -> anyhow::Result<Vec<f32>> {
    let bytes = read_input(path)?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!(
            "{:?} holds {} bytes, not a whole number of f32 samples",
            path,
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn volume_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Load a container and resolve its codec from the header.
fn open_container(path: &Path) -> anyhow::Result<(Vec<u8>, Arc<dyn Codec>)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let codec_id = Header::from_bytes(&bytes)?.codec_id;
    let codec = codec_by_id(codec_id)?;
    debug!(codec = codec.name(), bytes = bytes.len(), "container loaded");
    Ok((bytes, codec))
}

// ── Subcommand implementations ─────────────────────────────────────────────

struct CompressArgs {
    input: PathBuf,
    output: PathBuf,
    dims: Dims,
    precision: f64,
    codec: String,
    zstd_level: i32,
    intervals: Option<u32>,
    u32_sizes: bool,
    config: Option<PathBuf>,
}

fn run_compress(args: CompressArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {:?}", path))?;
            serde_json::from_str::<SzConfig>(&text)
                .with_context(|| format!("parsing config {:?}", path))?
        }
        None => SzConfig::default(),
    };
    if let Some(q) = args.intervals {
        config.quantization_intervals = q;
    }
    if args.u32_sizes {
        config.size_type = SizeType::U32;
    }

    let codec = codec_from_name(&args.codec, args.zstd_level)?;
    let codec_display = codec.name();
    let volume = read_volume(&args.input)?;
    let writer = Writer::new(codec, config)?;

    let t0 = Instant::now();
    let container = writer.compress(&volume, args.dims, args.precision)?;
    let elapsed = t0.elapsed();

    std::fs::write(&args.output, &container)
        .with_context(|| format!("writing output file {:?}", args.output))?;
    info!(output = ?args.output, bytes = container.len(), "container written");

    let raw_size = (volume.len() * 4) as u64;
    let compressed_size = container.len() as u64;
    let d = args.dims;
    eprintln!("  codec       : {}", codec_display);
    eprintln!("  dims        : {}x{}x{}", d.r1, d.r2, d.r3);
    eprintln!("  precision   : {}", args.precision);
    eprintln!("  raw size    : {}", human_bytes(raw_size));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    eprintln!("  ratio       : {:.2}x", raw_size as f64 / compressed_size as f64);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw_size as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn kind_name(kind: PredictorKind) -> &'static str {
    match kind {
        PredictorKind::Lorenzo => "lorenzo",
        PredictorKind::Regression => "regression",
    }
}

fn run_inspect(file: PathBuf, show_blocks: bool, json: bool) -> anyhow::Result<()> {
    let (bytes, codec) = open_container(&file)?;
    let reader = Reader::parse(&bytes, codec.as_ref())?;
    let header = reader.header();
    let d = reader.dims();
    let s = reader.sections();
    let [major, minor, patch] = header.version;

    if json {
        let mut summary = serde_json::json!({
            "file": file,
            "version": format!("{major}.{minor}.{patch}"),
            "codec": codec.name(),
            "codec_id": header.codec_id,
            "dims": [d.r1, d.r2, d.r3],
            "size_type": reader.size_type(),
            "precision": reader.precision(),
            "intervals": reader.intervals(),
            "mean": reader.mean(),
            "blocks": reader.num_blocks(),
            "regression_blocks": reader.regression_blocks(),
            "unpredictable": reader.unpredictable_count(),
            "container_bytes": bytes.len(),
            "ratio": reader.ratio(),
            "checksum": format!("{:016x}", header.checksum),
            "sections": {
                "header": s.header,
                "metadata": s.metadata,
                "indicator": s.indicator,
                "coefficients": s.coefficients,
                "unpredictable_counts": s.unpredictable_counts,
                "unpredictable_values": s.unpredictable_values,
                "chunk_sizes": s.chunk_sizes,
                "chunks": s.chunks,
            },
        });
        if show_blocks {
            let blocks: Vec<_> = reader
                .indicator()
                .iter()
                .enumerate()
                .map(|(i, k)| {
                    serde_json::json!({
                        "index": i,
                        "predictor": kind_name(*k),
                        "unpredictable": reader.block_unpredictable_count(i),
                    })
                })
                .collect();
            summary["block_table"] = serde_json::Value::from(blocks);
        }
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("=== SZRB File: {:?} ===", file);
    println!();
    println!("  format version : {}.{}.{}", major, minor, patch);
    println!("  codec          : {} (id={})", codec.name(), header.codec_id);
    println!("  dims           : {}x{}x{}", d.r1, d.r2, d.r3);
    println!("  size fields    : {} bytes", reader.size_type().width());
    println!("  precision      : {}", reader.precision());
    println!("  intervals      : {}", reader.intervals());
    match reader.mean() {
        Some(mean) => println!("  dense mean     : {}", mean),
        None => println!("  dense mean     : off"),
    }
    println!(
        "  blocks         : {} ({} regression, {} lorenzo)",
        reader.num_blocks(),
        reader.regression_blocks(),
        reader.num_blocks() - reader.regression_blocks()
    );
    println!("  unpredictable  : {}", reader.unpredictable_count());
    println!("  raw size       : {}", human_bytes((d.len() * 4) as u64));
    println!("  compressed     : {}", human_bytes(bytes.len() as u64));
    println!("  ratio          : {:.2}x", reader.ratio());
    println!("  checksum       : {:016x}", header.checksum);
    println!();
    println!("  {:<22}  {:>12}", "section", "size");
    println!("  {}", "-".repeat(36));
    for (name, size) in [
        ("header", s.header),
        ("metadata", s.metadata),
        ("indicator", s.indicator),
        ("coefficients", s.coefficients),
        ("unpredictable counts", s.unpredictable_counts),
        ("unpredictable values", s.unpredictable_values),
        ("chunk sizes", s.chunk_sizes),
        ("block chunks", s.chunks),
    ] {
        println!("  {:<22}  {:>12}", name, human_bytes(size as u64));
    }

    if show_blocks {
        println!();
        println!("  {:>8}  {:>12}  {:>14}", "block", "predictor", "unpredictable");
        println!("  {}", "-".repeat(38));
        for (i, kind) in reader.indicator().iter().enumerate() {
            println!(
                "  {:>8}  {:>12}  {:>14}",
                i,
                kind_name(*kind),
                reader.block_unpredictable_count(i).unwrap_or(0)
            );
        }
    }

    Ok(())
}

fn run_verify(file: PathBuf, original: PathBuf) -> anyhow::Result<()> {
    let (bytes, codec) = open_container(&file)?;
    let reader = Reader::parse(&bytes, codec.as_ref())?;
    let source = read_volume(&original)?;
    if source.len() != reader.dims().len() {
        anyhow::bail!(
            "original holds {} samples but the container describes {}",
            source.len(),
            reader.dims().len()
        );
    }

    let t0 = Instant::now();
    let decoded = reader.decompress()?;
    let elapsed = t0.elapsed();

    let bound = reader.precision();
    let mut max_err = 0f64;
    let mut violations = 0usize;
    for (&a, &b) in source.iter().zip(&decoded) {
        if a.to_bits() == b.to_bits() {
            continue;
        }
        let err = ((a - b) as f64).abs();
        if err.is_nan() || err > bound {
            violations += 1;
        }
        if err > max_err {
            max_err = err;
        }
    }

    println!("  samples     : {}", source.len());
    println!("  precision   : {}", bound);
    println!("  max error   : {:.6e}", max_err);
    println!("  violations  : {}", violations);
    println!("  ratio       : {:.2}x", reader.ratio());
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    if violations > 0 {
        anyhow::bail!("{} samples exceed the error bound {}", violations, bound);
    }
    Ok(())
}

fn run_read_block(file: PathBuf, index: usize, output: Option<PathBuf>) -> anyhow::Result<()> {
    let (bytes, codec) = open_container(&file)?;
    let reader = Reader::parse(&bytes, codec.as_ref())?;

    let kind = reader
        .indicator()
        .get(index)
        .copied()
        .map(kind_name)
        .unwrap_or("?");
    eprintln!(
        "decoding block {} of {} ({} predictor)...",
        index,
        reader.num_blocks(),
        kind
    );

    let t0 = Instant::now();
    let values = reader.read_block(index)?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded {} samples in {:.3}ms",
        values.len(),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, volume_bytes(&values))?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            println!("--- block {} ({} samples, one ii-plane per group) ---", index, values.len());
            for (ii, plane) in values.chunks(BLOCK_SIZE * BLOCK_SIZE).enumerate() {
                println!("  ii={}", ii);
                for row in plane.chunks(BLOCK_SIZE) {
                    print!("   ");
                    for v in row {
                        print!(" {:>12.5e}", v);
                    }
                    println!();
                }
            }
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("szr=info,szr_core=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            input,
            output,
            dims,
            precision,
            codec,
            zstd_level,
            intervals,
            u32_sizes,
            config,
        } => run_compress(CompressArgs {
            input,
            output,
            dims,
            precision,
            codec,
            zstd_level,
            intervals,
            u32_sizes,
            config,
        }),
        Commands::Inspect { file, blocks, json } => run_inspect(file, blocks, json),
        Commands::Verify { file, original } => run_verify(file, original),
        Commands::ReadBlock {
            file,
            index,
            output,
        } => run_read_block(file, index, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dims() {
        let d = parse_dims("100x500x7").unwrap();
        assert_eq!((d.r1, d.r2, d.r3), (100, 500, 7));
        assert!(parse_dims("10x10").is_err());
        assert!(parse_dims("0x10x10").is_err());
        assert!(parse_dims("axbxc").is_err());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
    }
}
