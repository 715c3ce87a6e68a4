//! Encode binary: feature-hashes columns of a parquet file into a numeric
//! matrix.
//!
//! ## Input
//!
//! - `--input`    parquet file, one frame column per parquet column
//! - `--spec`     transform spec JSON, e.g. `{"ids": true, "hash": [2, 3], "K": 4096}`
//! - `--metadata` (optional) a `metadata.json` from an earlier run. The
//!   modulus of each encoder is imported from it, overriding the spec's `K`,
//!   so the output matches the earlier run bucket-for-bucket. With
//!   `--metadata` the spec may leave `K` out.
//!
//! ## Output
//!
//! Written to `--output-dir`:
//! - `matrix.bin`     dense `[rows, encoders]` f64 matrix (see `sluice::io`)
//! - `metadata.json`  one-row metadata record holding each column's modulus
//! - `encoders.json`  serialized encoder state
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin encode -- --input data/sessions.parquet \
//!     --spec data/hash.json --output-dir out/sessions
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use indicatif::{HumanCount, HumanDuration};
use tracing::info;

use sluice::common::{DenseMatrix, SparseMatrix};
use sluice::encoder::{EncoderError, TransformInput};
use sluice::io::{read_metadata_json, read_parquet_frame, write_dense_bin, write_metadata_json};
use sluice::spec::TransformSpec;
use sluice::stats;
use sluice::transform::{MultiColumnEncoder, TransformConfig};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(about = "Feature-hash columns of a parquet file into a numeric matrix")]
struct Args {
    /// Parquet file to encode.
    #[arg(long)]
    input: PathBuf,

    /// Transform spec JSON naming the hashed columns and the bucket count `K`.
    #[arg(long)]
    spec: PathBuf,

    /// Directory receiving `matrix.bin`, `metadata.json` and `encoders.json`.
    #[arg(long)]
    output_dir: PathBuf,

    /// Rows per parallel chunk (0 processes all rows as one chunk).
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// Worker threads (0 uses the rayon default).
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Encode through sparse rows instead of writing the dense matrix directly.
    #[arg(long, default_value_t = false)]
    sparse: bool,

    /// Collect and print apply timings.
    #[arg(long, default_value_t = false)]
    stats: bool,

    /// Metadata record from an earlier run to import instead of using `K`.
    #[arg(long)]
    metadata: Option<PathBuf>,
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    info!("Input:  {}", args.input.display());
    info!("Spec:   {}", args.spec.display());
    info!("Output: {}", args.output_dir.display());
    fs::create_dir_all(&args.output_dir)?;

    let config = TransformConfig {
        block_size: args.block_size,
        sparse: args.sparse,
        statistics: args.stats,
    };
    if config.statistics {
        stats::reset();
    }

    let pipeline_start = Instant::now();

    // ── Step 1: Load frame and spec ──────────────────────────────────────
    info!("Step 1: Loading frame...");
    let frame = read_parquet_frame(&args.input)?;
    info!(
        "  {} rows, {} columns",
        HumanCount(frame.num_rows() as u64),
        frame.num_columns()
    );
    let spec = TransformSpec::load(&args.spec)?;

    // ── Step 2: Build or import ──────────────────────────────────────────
    info!("Step 2: Preparing encoders...");
    let mut encoder = MultiColumnEncoder::from_spec(&spec, &frame.column_names())?;
    match &args.metadata {
        Some(path) => {
            info!("  Importing metadata from {}", path.display());
            let meta = read_metadata_json(path)?;
            encoder.init_metadata(&meta)?;
        }
        None if spec.k.is_none() && !encoder.is_empty() => {
            return Err(EncoderError::InvalidSpec(
                "spec has no K; pass --metadata to import the modulus".to_string(),
            )
            .into());
        }
        None => encoder.build(&frame)?,
    }
    info!("  {} encoders", encoder.len());

    // ── Step 3: Apply ────────────────────────────────────────────────────
    info!("Step 3: Applying (block size {})...", config.block_size);
    let apply_start = Instant::now();
    let matrix = if config.sparse {
        let mut out = SparseMatrix::new(frame.num_rows(), encoder.len());
        encoder.apply_sparse(&frame, &mut out, &config)?;
        out.to_dense()
    } else {
        let mut out = DenseMatrix::new(frame.num_rows(), encoder.len());
        encoder.apply_dense(TransformInput::Frame(&frame), &mut out, &config)?;
        out
    };
    info!(
        "  Encoded {} cells in {}",
        HumanCount((matrix.num_rows() * matrix.num_cols()) as u64),
        HumanDuration(apply_start.elapsed())
    );

    // ── Step 4: Write outputs ────────────────────────────────────────────
    info!("Step 4: Writing outputs...");
    write_dense_bin(&matrix, &args.output_dir.join("matrix.bin"))?;
    write_metadata_json(&encoder.metadata(&frame)?, &args.output_dir.join("metadata.json"))?;
    fs::write(
        args.output_dir.join("encoders.json"),
        serde_json::to_vec_pretty(&encoder)?,
    )?;

    if config.statistics {
        for (name, elapsed) in stats::snapshot() {
            println!("{name:<40} {elapsed:>12.3?}");
        }
    }

    info!("Done in {}", HumanDuration(pipeline_start.elapsed()));
    Ok(())
}
