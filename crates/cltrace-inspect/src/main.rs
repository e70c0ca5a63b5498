#![forbid(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use cltrace::info::info_file_name;
use cltrace::metadata::metadata_file_name;
use cltrace::{BinaryDataLoader, BinaryFileIndexInfo, TraceJson};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "cltrace-inspect",
    about = "Inspect OpenCL capture output (metadata, binary data blocks, info queries)"
)]
struct Args {
    /// Capture output directory.
    #[arg(env = "CLTRACE_OUT_DIR")]
    dir: PathBuf,

    /// Trace label (file prefix). Detected from the metadata file when omitted.
    #[arg(long, env = "CLTRACE_LABEL")]
    label: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Frame range, compression and resource capacities.
    Summary {
        /// Print the metadata file as JSON instead.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Block table of the binary data file.
    Blocks,
    /// Copy `len` bytes at a binary data offset (as printed in `GetBinaryData(..)`).
    Extract {
        #[arg(long)]
        offset: u64,
        #[arg(long)]
        len: usize,
        /// Destination file (defaults to stdout).
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Recorded `clGet*Info` results.
    Info,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    run(Args::parse())
}

fn run(args: Args) -> Result<()> {
    let label = match args.label {
        Some(label) => label,
        None => detect_label(&args.dir)?,
    };
    let meta_path = args.dir.join(metadata_file_name(&label));
    let meta = TraceJson::read(&meta_path)
        .with_context(|| format!("failed to read trace metadata {}", meta_path.display()))?;
    tracing::debug!(label = %label, path = %meta_path.display(), "loaded trace metadata");

    let mut out = io::stdout().lock();
    match args.command {
        Command::Summary { json } => {
            if json {
                serde_json::to_writer_pretty(&mut out, &meta)?;
                writeln!(out)?;
            } else {
                print_summary(&mut out, &label, &meta)?;
            }
        }
        Command::Blocks => {
            let loader = open_loader(&args.dir, &label, &meta)?;
            writeln!(out, "{:>6} {:>12} {:>12} {:>12} {:>12}", "block", "file_off", "data_off", "size", "stored")?;
            for (i, b) in loader.blocks().iter().enumerate() {
                writeln!(
                    out,
                    "{:>6} {:>12} {:>12} {:>12} {:>12}",
                    i, b.file_offset, b.data_offset, b.data_size, b.compressed_size
                )?;
            }
            writeln!(out, "total data: {} bytes", loader.data_size())?;
        }
        Command::Extract { offset, len, output } => {
            let mut loader = open_loader(&args.dir, &label, &meta)?;
            let bytes = loader
                .get(offset, len)
                .with_context(|| format!("no {len} bytes at offset {offset}"))?;
            match output {
                Some(path) => fs::write(&path, bytes)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => out.write_all(bytes)?,
            }
        }
        Command::Info => {
            let path = args.dir.join(info_file_name(&label));
            let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let entries: Vec<serde_json::Value> = serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not an info array", path.display()))?;
            for entry in &entries {
                writeln!(out, "{entry}")?;
            }
            writeln!(out, "{} queries", entries.len())?;
        }
    }
    Ok(())
}

fn print_summary(out: &mut impl Write, label: &str, meta: &TraceJson) -> Result<()> {
    let t = &meta.trace_metadata;
    let b = &meta.binary_metadata;
    writeln!(out, "label: {label}")?;
    writeln!(out, "capture revision: {}", t.capture_revision)?;
    writeln!(out, "frames: {}..={}", t.frame_start, t.frame_end)?;
    writeln!(
        out,
        "binary data: {} ({} blocks of {} bytes)",
        if t.is_binary_data_compressed { "lz4" } else { "uncompressed" },
        b.block_count,
        b.block_size
    )?;
    writeln!(out, "resource capacities:")?;
    for (map, capacity) in meta.resource_capacities.iter().filter(|(_, &c)| c > 0) {
        writeln!(out, "  {map}: {capacity}")?;
    }
    writeln!(out, "files:")?;
    for file in &meta.trace_files {
        writeln!(out, "  {file}")?;
    }
    Ok(())
}

fn open_loader(dir: &Path, label: &str, meta: &TraceJson) -> Result<BinaryDataLoader> {
    let compression = meta.compression();
    let path = dir.join(format!("{label}{}", compression.file_suffix()));
    let info = BinaryFileIndexInfo::from(meta.binary_metadata);
    BinaryDataLoader::open(&path, &info, compression)
        .with_context(|| format!("failed to open binary data {}", path.display()))
}

/// The label of the only trace metadata file in `dir`.
fn detect_label(dir: &Path) -> Result<String> {
    let info_suffix = info_file_name("");
    let mut labels = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.ends_with(&info_suffix) {
            continue;
        }
        if let Some(label) = name.strip_suffix(".json") {
            labels.push(label.to_owned());
        }
    }
    match labels.len() {
        0 => Err(anyhow!("no trace metadata in {}", dir.display())),
        1 => Ok(labels.remove(0)),
        _ => bail!("several traces in {} ({}); pass --label", dir.display(), labels.join(", ")),
    }
}
