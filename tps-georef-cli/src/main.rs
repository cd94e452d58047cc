use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tps_georef::gcp_list::{gcp_list_from_node, GCP_LIST};
use tps_georef::serialize::{read_document, TPS_TRANSFORMER};
use tps_georef::{Gcp, NumThreads, TpsOptions, TpsTransformer, Transformer, XmlNode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// GCP document: a TPSTransformer or a bare GCPList
    #[arg(long, value_name = "FILE", required_unless_present = "dataset")]
    gcps: Option<PathBuf>,

    /// Raster whose embedded GCPs are used (requires the `gdal` feature)
    #[arg(long, value_name = "FILE", conflicts_with = "gcps")]
    dataset: Option<PathBuf>,

    /// Fit georeferenced -> pixel/line as the forward direction
    #[arg(long)]
    reverse: bool,

    /// Transform from destination to source coordinates
    #[arg(short, long)]
    inverse: bool,

    /// Solver threads: a positive count or ALL_CPUS
    #[arg(short, long, env = "GDAL_NUM_THREADS", default_value = "1")]
    threads: String,

    /// Print the serialized transformer instead of transforming stdin
    #[arg(long)]
    serialize: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr, stdout carries coordinates.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let options = TpsOptions::with_num_threads(NumThreads::parse(&args.threads)?);

    let start_time = std::time::Instant::now();
    let (gcps, reversed) = match (&args.gcps, &args.dataset) {
        (Some(path), _) => read_gcp_document(path)?,
        (None, Some(path)) => (read_dataset_gcps(path)?, false),
        (None, None) => anyhow::bail!("Either --gcps or --dataset is required"),
    };

    let transformer = TpsTransformer::new(&gcps, reversed || args.reverse, &options)
        .inspect_err(|e| error!("Failed to build TPS transformer: {}", e))
        .context("Failed to build TPS transformer")?;
    info!(
        "Fitted {} GCPs in {:?}",
        transformer.gcps().len(),
        start_time.elapsed()
    );

    if args.serialize {
        println!("{}", transformer.to_xml_string()?);
        return Ok(());
    }

    transform_stdin(&transformer, args.inverse)
}

/// Returns the GCPs and reversed flag stored in a GCP document.
fn read_gcp_document(path: &Path) -> Result<(Vec<Gcp>, bool)> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let root = XmlNode::parse(&text).with_context(|| format!("Failed to parse {:?}", path))?;

    if root.is(TPS_TRANSFORMER) {
        read_document(&root).with_context(|| format!("Invalid transformer in {:?}", path))
    } else if root.is(GCP_LIST) {
        Ok((gcp_list_from_node(&root)?, false))
    } else {
        error!("Unsupported document root: <{}>", root.name);
        anyhow::bail!("Expected a <{}> or <{}> document", TPS_TRANSFORMER, GCP_LIST);
    }
}

#[cfg(feature = "gdal")]
fn read_dataset_gcps(path: &Path) -> Result<Vec<Gcp>> {
    tps_georef::dataset::read_gcps(path)
}

#[cfg(not(feature = "gdal"))]
fn read_dataset_gcps(path: &Path) -> Result<Vec<Gcp>> {
    anyhow::bail!(
        "Cannot read {:?}: tps-georef was built without the `gdal` feature",
        path
    )
}

/// Transforms `x y [z]` lines from stdin, one output line per input line.
fn transform_stdin(transformer: &TpsTransformer, dst_to_src: bool) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let values = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid coordinate on line {}: {:?}", line_no + 1, line))?;
        if values.len() < 2 {
            anyhow::bail!("Expected at least x and y on line {}", line_no + 1);
        }

        let mut x = [values[0]];
        let mut y = [values[1]];
        let mut z = [values.get(2).copied().unwrap_or(0.0)];
        let mut success = [false];
        if transformer.transform(dst_to_src, &mut x, &mut y, &mut z, &mut success) {
            writeln!(out, "{} {} {}", x[0], y[0], z[0])?;
        } else {
            writeln!(out, "transformation failed.")?;
        }
    }

    Ok(())
}
