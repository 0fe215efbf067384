mod sink;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser, ValueHint};
use odometer::{
    compute_mileage, default_now, parse_duration_token, parse_gpx_samples, Horizon, Params,
    Sample,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::sink::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "odometer",
    author,
    version,
    about = "Trailing-window mileage from a directory of GPX tracks",
    long_about = None
)]
struct Cli {
    /// Directory containing track files
    #[arg(value_hint = ValueHint::DirPath)]
    directory: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Bucket width (e.g. 1d, 6h, 3600)
    #[arg(long, default_value = "1d")]
    granularity: String,

    /// Trailing window summed for each bucket
    #[arg(long, default_value = "30d")]
    window: String,

    /// How far back the reported series extends
    #[arg(long, default_value = "365d")]
    lookback: String,

    /// Reference instant (RFC 3339); defaults to one bucket past the current time
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// File-name suffix selecting track files
    #[arg(long, default_value = "gpx")]
    extension: String,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

/// Outcome of reading the track directory.
#[derive(Debug, Default)]
struct IngestReport {
    tracks: Vec<Vec<Sample>>,
    parsed: Vec<PathBuf>,
    skipped: Vec<(PathBuf, String)>,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => print!("{}", err.render()),
                _ => println!("{}", err.render()),
            }
            return Ok(());
        }
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    handle_mileage(cli)
}

fn handle_mileage(cli: Cli) -> Result<()> {
    let params = match build_params(&cli) {
        Ok(params) => params,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };
    let horizon = match build_horizon(&cli, &params, Utc::now()) {
        Ok(horizon) => horizon,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };
    debug!(
        "Horizon: collect from {}, report from {}, until {} ({} buckets)",
        horizon.collect_start(),
        horizon.aggregate_start(),
        horizon.now(),
        horizon.bucket_count()
    );

    let t_parse = Instant::now();
    let files = match collect_track_files(&cli.directory, &cli.extension) {
        Ok(files) => files,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };
    let report = ingest_tracks(&files);
    if cli.verbose {
        info!(
            "Parse stage: {:.1} ms",
            t_parse.elapsed().as_secs_f64() * 1000.0
        );
    }

    let t_compute = Instant::now();
    let series = compute_mileage(horizon, &report.tracks);
    if cli.verbose {
        info!(
            "Compute stage: {:.1} ms ({} buckets)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            series.horizon.bucket_count()
        );
    }
    let stats = series.stats;
    info!(
        "Ingested {} of {} files ({} skipped): {} samples, {} pairs, {:.1} miles in horizon",
        report.parsed.len(),
        files.len(),
        report.skipped.len(),
        stats.samples,
        stats.pairs,
        stats.miles
    );
    debug!(
        "Samples without time: {}, outside horizon: {}, pairs past last bucket: {}",
        stats.untimed, stats.out_of_horizon, stats.dropped
    );

    let t_render = Instant::now();
    let sink = cli.format.sink();
    if cli.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        sink.write(&series.points, &mut handle)?;
    } else {
        let file = File::create(&cli.output)
            .with_context(|| format!("failed to create {}", cli.output.display()))?;
        let mut writer = BufWriter::new(file);
        sink.write(&series.points, &mut writer)?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", cli.output.display()))?;
        info!("Wrote {:?} output: {}", cli.format, cli.output.display());
    }
    if cli.verbose {
        info!(
            "Render stage: {:.1} ms ({} rows)",
            t_render.elapsed().as_secs_f64() * 1000.0,
            series.points.len()
        );
    }

    Ok(())
}

fn build_params(cli: &Cli) -> Result<Params> {
    let params = Params {
        granularity_s: parse_duration_token(&cli.granularity)?,
        window_s: parse_duration_token(&cli.window)?,
        lookback_s: parse_duration_token(&cli.lookback)?,
    };
    params.validate()?;
    Ok(params)
}

/// Horizon ending at `--now`, or one bucket past `wall_clock` when unset.
fn build_horizon(cli: &Cli, params: &Params, wall_clock: DateTime<Utc>) -> Result<Horizon> {
    let now = match cli.now {
        Some(now) => now,
        None => default_now(wall_clock, params)?,
    };
    Ok(Horizon::new(now, params)?)
}

/// Files directly inside `dir` whose name ends with `extension`, sorted by name.
fn collect_track_files(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let suffix = extension.to_ascii_lowercase();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let matches = name.to_string_lossy().to_ascii_lowercase().ends_with(&suffix);
        if matches && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every file in parallel; unreadable or malformed files are skipped.
/// Tracks come back in the same order as `files`.
fn ingest_tracks(files: &[PathBuf]) -> IngestReport {
    let parsed: Vec<(PathBuf, Result<Vec<Sample>>)> = files
        .par_iter()
        .map(|path| (path.clone(), load_track(path)))
        .collect();

    let mut report = IngestReport::default();
    for (path, result) in parsed {
        match result {
            Ok(samples) => {
                debug!("Parsed {} ({} samples)", path.display(), samples.len());
                report.tracks.push(samples);
                report.parsed.push(path);
            }
            Err(err) => {
                warn!("Skipping {}: {:#}", path.display(), err);
                report.skipped.push((path, format!("{:#}", err)));
            }
        }
    }
    report
}

fn load_track(path: &Path) -> Result<Vec<Sample>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let samples =
        parse_gpx_samples(&data).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(samples)
}
