use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use energetics_core::{
    default_worker_count, export::export_region_track_ids, ingestion::read_raw_tracks,
    BatchProcessor, ContinentMask, CredentialRotator, FilteredTrackTable, FsResultStore,
    PipelineConfig, ProcessRunner, RegionFilter,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Cyclone track selection and energetics batch runner",
    long_about = None
)]
struct Cli {
    /// TOML configuration file (falls back to ENERGETICS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep tracks with genesis in the selected regions that stay mostly over the ocean
    SelectTracks(SelectTracksArgs),
    /// Run the Lorenz Energy Cycle program once per filtered track
    RunLec(RunLecArgs),
    /// Write one track id list per genesis region
    ExportRegions(ExportRegionsArgs),
}

#[derive(Args, Debug)]
struct SelectTracksArgs {
    /// Glob matching the raw, headerless track CSV files
    #[arg(long)]
    raw_tracks: String,
    /// GeoJSON file with the land polygons
    #[arg(long)]
    continent: PathBuf,
    /// Where to write the filtered track table
    #[arg(long)]
    output: PathBuf,
    /// Allowed genesis region (repeatable)
    #[arg(long = "region")]
    regions: Vec<String>,
    /// Maximum percentage of a track's points allowed over land (exclusive)
    #[arg(long)]
    threshold: Option<f64>,
    /// Number of classification batches run in parallel
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args, Debug)]
struct RunLecArgs {
    /// Filtered track table produced by select-tracks
    #[arg(long)]
    tracks: PathBuf,
    /// Path to the LEC entry script
    #[arg(long)]
    lec_script: Option<PathBuf>,
    /// Interpreter or executable that runs the LEC program
    #[arg(long)]
    program: Option<String>,
    /// Directory the LEC program runs in (defaults to the script's directory)
    #[arg(long)]
    working_dir: Option<PathBuf>,
    /// Directory holding `<id>_ERA5_track` result folders
    #[arg(long)]
    results_dir: Option<PathBuf>,
    /// Directory for the per-track input files
    #[arg(long)]
    inputs_dir: Option<PathBuf>,
    /// Genesis region whose tracks are processed
    #[arg(long)]
    region: Option<String>,
    /// Only process the first N track ids
    #[arg(long)]
    limit: Option<usize>,
    /// Concurrent LEC processes
    #[arg(long)]
    workers: Option<usize>,
    /// Rotate credentials after this many completed runs
    #[arg(long)]
    rotation_batch_size: Option<usize>,
    /// Credentials file read by the LEC program
    #[arg(long)]
    credential_target: Option<PathBuf>,
    /// Candidate credentials file (repeatable, used round-robin)
    #[arg(long = "credential-candidate")]
    credential_candidates: Vec<PathBuf>,
    /// Run `git pull` in the LEC checkout before starting
    #[arg(long)]
    git_pull: bool,
}

#[derive(Args, Debug)]
struct ExportRegionsArgs {
    /// Filtered track table produced by select-tracks
    #[arg(long)]
    tracks: PathBuf,
    /// Directory receiving one `track_ids_<region>.txt` per region
    #[arg(long)]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Command::SelectTracks(args) => handle_select_tracks(config, args),
        Command::RunLec(args) => handle_run_lec(config, args),
        Command::ExportRegions(args) => handle_export_regions(args),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    let path = path.or_else(|| env::var_os("ENERGETICS_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => {
            let config = PipelineConfig::load(&path)
                .with_context(|| format!("failed to load configuration {}", path.display()))?;
            info!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn handle_select_tracks(mut config: PipelineConfig, args: SelectTracksArgs) -> Result<()> {
    if !args.regions.is_empty() {
        config.select.allowed_regions = args.regions;
    }
    if let Some(threshold) = args.threshold {
        config.select.threshold_percentage = threshold;
    }
    if let Some(workers) = args.workers {
        config.select.workers = Some(workers);
    }
    config.validate().context("invalid select-tracks settings")?;

    let regions = config.region_set()?;
    let points =
        read_raw_tracks(&args.raw_tracks).context("failed to read the raw track database")?;
    let mask = ContinentMask::load(&args.continent).with_context(|| {
        format!(
            "failed to load continent geometry {}",
            args.continent.display()
        )
    })?;

    let mut filter = RegionFilter::new(regions, Arc::new(mask));
    if let Some(workers) = config.select.workers {
        filter = filter.with_workers(workers);
    }

    info!(
        allowed = ?config.select.allowed_regions,
        threshold = config.select.threshold_percentage,
        "Filtering tracks by region and continent"
    );
    let outcome = filter.filter(
        &points,
        &config.select.allowed_regions,
        config.select.threshold_percentage,
    )?;
    outcome.report.log();

    outcome
        .table
        .write(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(
        path = %args.output.display(),
        tracks = outcome.table.track_count(),
        rows = outcome.table.len(),
        "Filtered tracks saved"
    );
    Ok(())
}

fn handle_run_lec(mut config: PipelineConfig, args: RunLecArgs) -> Result<()> {
    let lec = &mut config.lec;
    if let Some(script) = args.lec_script {
        lec.script = Some(script);
    }
    if let Some(program) = args.program {
        lec.program = program;
    }
    if let Some(dir) = args.working_dir {
        lec.working_dir = Some(dir);
    }
    if let Some(dir) = args.results_dir {
        lec.results_dir = Some(dir);
    }
    if let Some(dir) = args.inputs_dir {
        lec.inputs_dir = dir;
    }
    if let Some(region) = args.region {
        lec.region = region;
    }
    if args.limit.is_some() {
        lec.limit = args.limit;
    }
    if let Some(workers) = args.workers {
        lec.workers = Some(workers);
    }
    if let Some(size) = args.rotation_batch_size {
        lec.rotation_batch_size = size;
    }
    if let Some(target) = args.credential_target {
        lec.credential_target = Some(target);
    }
    if !args.credential_candidates.is_empty() {
        lec.credential_candidates = args.credential_candidates;
    }
    config.validate().context("invalid run-lec settings")?;
    let lec = &config.lec;

    let table = FilteredTrackTable::read(&args.tracks)
        .with_context(|| format!("failed to read filtered tracks {}", args.tracks.display()))?;
    let mut track_ids = table.track_ids_in_region(&lec.region);
    if let Some(limit) = lec.limit {
        track_ids.truncate(limit);
    }
    if track_ids.is_empty() {
        warn!(region = %lec.region, "No tracks to process");
        return Ok(());
    }

    let mut runner = ProcessRunner::new(lec.program.clone());
    if let Some(script) = &lec.script {
        runner = runner.with_script(absolute(script)?);
    }
    if let Some(dir) = lec.resolved_working_dir() {
        runner = runner.with_working_dir(absolute(&dir)?);
    }
    if args.git_pull {
        runner
            .sync_checkout()
            .context("failed to update the LEC checkout")?;
    }

    let results_dir = absolute(&lec.resolved_results_dir())?;
    let inputs_dir = absolute(&lec.inputs_dir)?;
    let mut processor = BatchProcessor::new(
        Arc::new(table),
        FsResultStore::new(results_dir),
        runner,
        inputs_dir,
    );

    match (&lec.credential_target, lec.credential_candidates.is_empty()) {
        (Some(target), false) => {
            let candidates = lec
                .credential_candidates
                .iter()
                .map(|candidate| absolute(candidate))
                .collect::<Result<Vec<_>>>()?;
            processor = processor.with_rotator(CredentialRotator::new(
                absolute(target)?,
                candidates,
                lec.rotation_batch_size,
            ));
        }
        (Some(_), true) => bail!("--credential-target needs at least one --credential-candidate"),
        (None, false) => bail!("--credential-candidate needs --credential-target"),
        (None, true) => {}
    }

    let workers = lec.workers.unwrap_or_else(default_worker_count);
    info!(region = %lec.region, units = track_ids.len(), workers, "Using worker pool");
    processor.run_batch(&track_ids, workers)?;
    Ok(())
}

fn handle_export_regions(args: ExportRegionsArgs) -> Result<()> {
    let table = FilteredTrackTable::read(&args.tracks)
        .with_context(|| format!("failed to read filtered tracks {}", args.tracks.display()))?;
    let written = export_region_track_ids(&table, &args.output_dir)?;
    info!(files = written.len(), "Genesis region track ids exported");
    Ok(())
}

/// The LEC program runs in its own directory, so every path handed to it must be absolute.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(env::current_dir()
        .context("failed to read the current directory")?
        .join(path))
}
