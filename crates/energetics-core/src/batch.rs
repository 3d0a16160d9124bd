//! One external Lorenz Energy Cycle run per track, fanned out over a bounded worker pool.
//!
//! A unit whose results file already exists is skipped, so re-running a batch only retries
//! the tracks that never produced results. Nothing else about a run is persisted.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use rayon::ThreadPoolBuilder;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{
    CredentialRotationError, ExternalComputationError, InputPreparationError, Result, UnitError,
};
use crate::table::FilteredTrackTable;
use crate::tracks::TrackId;

/// Mode flags passed through to the LEC program untouched.
pub const LEC_MODE_FLAGS: [&str; 7] = ["-t", "-r", "-g", "-v", "-p", "-z", "--cdsapi"];

const PROGRESS_EVERY: usize = 5;

/// `available_parallelism - 4`, never below one.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .saturating_sub(4)
        .max(1)
}

pub fn results_dir_name(track_id: TrackId) -> String {
    format!("{track_id}_ERA5_track")
}

pub fn lec_arguments(track_id: TrackId, input: &Path) -> Vec<OsString> {
    let mut arguments = vec![OsString::from(format!("{track_id}_ERA5.nc"))];
    arguments.extend(LEC_MODE_FLAGS.iter().map(OsString::from));
    arguments.push(OsString::from("--trackfile"));
    arguments.push(input.as_os_str().to_os_string());
    arguments
}

pub trait ResultStore: Send + Sync {
    fn exists(&self, track_id: TrackId) -> bool;
}

/// Results laid out the way the LEC program writes them:
/// `{base}/{id}_ERA5_track/{id}_ERA5_track_results.csv`.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    base_dir: PathBuf,
}

impl FsResultStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn marker_path(&self, track_id: TrackId) -> PathBuf {
        let dir = results_dir_name(track_id);
        self.base_dir
            .join(&dir)
            .join(format!("{dir}_results.csv"))
    }
}

impl ResultStore for FsResultStore {
    fn exists(&self, track_id: TrackId) -> bool {
        self.marker_path(track_id).is_file()
    }
}

pub trait LecRunner: Send + Sync {
    fn run(
        &self,
        track_id: TrackId,
        input: &Path,
    ) -> std::result::Result<(), ExternalComputationError>;
}

/// Runs the LEC program as a child process and waits for it to exit.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    script: Option<PathBuf>,
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: None,
            working_dir: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn command(&self, track_id: TrackId, input: &Path) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(script) = &self.script {
            command.arg(script);
        }
        command.args(lec_arguments(track_id, input));
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// `git pull` inside the LEC checkout.
    pub fn sync_checkout(&self) -> std::result::Result<(), ExternalComputationError> {
        let mut command = Command::new("git");
        command.arg("pull");
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        wait_for("git", command)?;
        info!("Pulled latest LEC changes");
        Ok(())
    }
}

impl LecRunner for ProcessRunner {
    fn run(
        &self,
        track_id: TrackId,
        input: &Path,
    ) -> std::result::Result<(), ExternalComputationError> {
        wait_for(&self.program, self.command(track_id, input))
    }
}

fn wait_for(
    program: &str,
    mut command: Command,
) -> std::result::Result<(), ExternalComputationError> {
    let status = command
        .status()
        .map_err(|source| ExternalComputationError::Launch {
            program: program.to_string(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(ExternalComputationError::NonZeroExit {
            program: program.to_string(),
            code: status.code(),
        })
    }
}

/// Cycles the credentials file the LEC program reads through a fixed list of candidates.
///
/// Each rotation is a plain file copy. Two workers crossing thresholds at nearly the same time
/// may race on the target; the last copy wins.
#[derive(Debug, Clone)]
pub struct CredentialRotator {
    target: PathBuf,
    candidates: Vec<PathBuf>,
    batch_size: usize,
}

impl CredentialRotator {
    pub fn new(target: impl Into<PathBuf>, candidates: Vec<PathBuf>, batch_size: usize) -> Self {
        Self {
            target: target.into(),
            candidates,
            batch_size: batch_size.max(1),
        }
    }

    /// Candidate to install after `completed` finished units, when that count is a rotation point.
    pub fn candidate_for(&self, completed: usize) -> Option<usize> {
        if completed == 0 || completed % self.batch_size != 0 || self.candidates.is_empty() {
            return None;
        }
        Some((completed / self.batch_size - 1) % self.candidates.len())
    }

    pub fn rotate(
        &self,
        completed: usize,
    ) -> std::result::Result<Option<usize>, CredentialRotationError> {
        if self.candidates.is_empty() {
            return if completed > 0 && completed % self.batch_size == 0 {
                Err(CredentialRotationError::NoCandidates)
            } else {
                Ok(None)
            };
        }
        let Some(index) = self.candidate_for(completed) else {
            return Ok(None);
        };
        let from = &self.candidates[index];
        std::fs::copy(from, &self.target).map_err(|source| CredentialRotationError::Copy {
            from: from.clone(),
            to: self.target.clone(),
            source,
        })?;
        Ok(Some(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Skipped,
    Succeeded,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub track_id: TrackId,
    pub status: UnitStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub wall_time: Duration,
    /// Mean over units that were actually dispatched.
    pub mean_elapsed: Option<Duration>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[Outcome], wall_time: Duration) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            wall_time,
            mean_elapsed: None,
        };
        let mut dispatched_time = Duration::ZERO;
        for outcome in outcomes {
            match outcome.status {
                UnitStatus::Skipped => summary.skipped += 1,
                UnitStatus::Succeeded => summary.succeeded += 1,
                UnitStatus::Failed { .. } => summary.failed += 1,
            }
            if outcome.status != UnitStatus::Skipped {
                dispatched_time += outcome.elapsed;
            }
        }
        let dispatched = summary.succeeded + summary.failed;
        if dispatched > 0 {
            summary.mean_elapsed = Some(dispatched_time / dispatched as u32);
        }
        summary
    }

    pub fn log(&self) {
        let wall_minutes = self.wall_time.as_secs_f64() / 60.0;
        let mean_minutes = self
            .mean_elapsed
            .map(|mean| mean.as_secs_f64() / 60.0)
            .unwrap_or(0.0);
        info!(
            total = self.total,
            succeeded = self.succeeded,
            failed = self.failed,
            skipped = self.skipped,
            wall_hours = wall_minutes / 60.0,
            wall_minutes,
            mean_minutes,
            "Finished LEC batch"
        );
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<Outcome>,
    pub summary: BatchSummary,
}

#[derive(Serialize)]
struct LecTrackRecord<'a> {
    time: &'a str,
    #[serde(rename = "Lat")]
    lat: f64,
    #[serde(rename = "Lon")]
    lon: f64,
    min_max_zeta_850: f64,
}

pub struct BatchProcessor<S, R> {
    table: Arc<FilteredTrackTable>,
    store: S,
    runner: R,
    inputs_dir: PathBuf,
    rotator: Option<CredentialRotator>,
    completed: AtomicUsize,
}

impl<S: ResultStore, R: LecRunner> BatchProcessor<S, R> {
    pub fn new(
        table: Arc<FilteredTrackTable>,
        store: S,
        runner: R,
        inputs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            table,
            store,
            runner,
            inputs_dir: inputs_dir.into(),
            rotator: None,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn with_rotator(mut self, rotator: CredentialRotator) -> Self {
        self.rotator = Some(rotator);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Value of the counter that drives credential rotation.
    pub fn completed_units(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn input_path(&self, track_id: TrackId) -> PathBuf {
        self.inputs_dir.join(format!("track_{track_id}.csv"))
    }

    pub fn is_already_done(&self, track_id: TrackId) -> bool {
        self.store.exists(track_id)
    }

    /// Writes the `;`-separated track file the LEC program expects. Vorticity is always
    /// written as a non-positive value.
    pub fn prepare_input(
        &self,
        track_id: TrackId,
    ) -> std::result::Result<PathBuf, InputPreparationError> {
        let rows = self.table.rows_for(track_id);
        if rows.is_empty() {
            return Err(InputPreparationError::NoRows { track_id });
        }

        let mut records = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let missing = |field: &'static str| InputPreparationError::MissingField {
                track_id,
                row: row_index,
                field,
            };
            let time = row
                .date
                .as_deref()
                .filter(|date| !date.is_empty())
                .ok_or_else(|| missing("date"))?;
            let finite = |value: Option<f64>, field: &'static str| match value {
                None => Err(missing(field)),
                Some(value) if !value.is_finite() => Err(InputPreparationError::NonFinite {
                    track_id,
                    row: row_index,
                    field,
                    value,
                }),
                Some(value) => Ok(value),
            };
            let lat = finite(row.latitude, "lat vor")?;
            let lon = finite(row.longitude, "lon vor")?;
            let vorticity = finite(row.vorticity, "vor42")?;
            records.push(LecTrackRecord {
                time,
                lat,
                lon,
                min_max_zeta_850: -vorticity.abs(),
            });
        }

        std::fs::create_dir_all(&self.inputs_dir).map_err(|source| InputPreparationError::Io {
            path: self.inputs_dir.clone(),
            source,
        })?;
        let path = self.input_path(track_id);
        let csv_error = |source: csv::Error| InputPreparationError::Csv {
            path: path.clone(),
            source,
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(&path)
            .map_err(csv_error)?;
        for record in &records {
            writer.serialize(record).map_err(csv_error)?;
        }
        writer.flush().map_err(|source| InputPreparationError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }

    pub fn run_one(&self, track_id: TrackId) -> Outcome {
        let started = Instant::now();
        if self.is_already_done(track_id) {
            info!(track_id, "Results already exist, skipping");
            return Outcome {
                track_id,
                status: UnitStatus::Skipped,
                elapsed: started.elapsed(),
            };
        }

        let status = match self.dispatch(track_id) {
            Ok(()) => {
                info!(track_id, "LEC run succeeded");
                UnitStatus::Succeeded
            }
            Err(err) => {
                error!(track_id, error = %err, "LEC run failed");
                UnitStatus::Failed {
                    error: err.to_string(),
                }
            }
        };

        Outcome {
            track_id,
            status,
            elapsed: started.elapsed(),
        }
    }

    fn dispatch(&self, track_id: TrackId) -> std::result::Result<(), UnitError> {
        let input = self.prepare_input(track_id)?;
        let result = self.runner.run(track_id, &input);
        self.record_completion();
        Ok(result?)
    }

    fn record_completion(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(rotator) = &self.rotator else {
            return;
        };
        match rotator.rotate(completed) {
            Ok(Some(index)) => info!(completed, candidate = index, "Rotated LEC credentials"),
            Ok(None) => {}
            Err(err) => warn!(completed, error = %err, "Credential rotation failed"),
        }
    }

    /// Runs every unit on a pool of `worker_count` threads. Outcomes come back in completion
    /// order; sort by track id if a stable order matters.
    pub fn run_batch(&self, track_ids: &[TrackId], worker_count: usize) -> Result<BatchReport> {
        let worker_count = worker_count.max(1);
        let total = track_ids.len();
        let already_done = track_ids
            .iter()
            .filter(|track_id| self.is_already_done(**track_id))
            .count();
        self.completed.store(already_done, Ordering::SeqCst);

        info!(
            units = total,
            already_done,
            workers = worker_count,
            "Starting LEC batch"
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("lec-worker-{index}"))
            .build()?;

        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<Outcome>();
        let mut outcomes = Vec::with_capacity(total);

        thread::scope(|scope| {
            scope.spawn(move || {
                pool.scope(|units| {
                    for &track_id in track_ids {
                        let tx = tx.clone();
                        units.spawn(move |_| {
                            let _ = tx.send(self.run_one(track_id));
                        });
                    }
                });
            });

            for outcome in rx.iter() {
                outcomes.push(outcome);
                let done = outcomes.len();
                if done % PROGRESS_EVERY == 0 || done == total {
                    info!(completed = done, total, "LEC batch progress");
                }
            }
        });

        let summary = BatchSummary::from_outcomes(&outcomes, started.elapsed());
        summary.log();
        Ok(BatchReport { outcomes, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_path_follows_lec_layout() {
        let store = FsResultStore::new("/data/LEC_Results");
        assert_eq!(
            store.marker_path(20010042),
            PathBuf::from("/data/LEC_Results/20010042_ERA5_track/20010042_ERA5_track_results.csv")
        );
    }

    #[test]
    fn arguments_match_the_lec_contract() {
        let args = lec_arguments(7, Path::new("inputs/track_7.csv"));
        let args: Vec<&str> = args.iter().map(|arg| arg.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "7_ERA5.nc",
                "-t",
                "-r",
                "-g",
                "-v",
                "-p",
                "-z",
                "--cdsapi",
                "--trackfile",
                "inputs/track_7.csv"
            ]
        );
    }

    #[test]
    fn rotation_cycles_through_candidates() {
        let rotator = CredentialRotator::new(
            "target",
            vec![PathBuf::from("a"), PathBuf::from("b")],
            2,
        );
        assert_eq!(rotator.candidate_for(0), None);
        assert_eq!(rotator.candidate_for(1), None);
        assert_eq!(rotator.candidate_for(2), Some(0));
        assert_eq!(rotator.candidate_for(3), None);
        assert_eq!(rotator.candidate_for(4), Some(1));
        assert_eq!(rotator.candidate_for(6), Some(0));
    }

    #[test]
    fn worker_count_is_at_least_one() {
        assert!(default_worker_count() >= 1);
    }

    #[test]
    fn summary_counts_statuses() {
        let outcomes = vec![
            Outcome {
                track_id: 1,
                status: UnitStatus::Skipped,
                elapsed: Duration::from_millis(1),
            },
            Outcome {
                track_id: 2,
                status: UnitStatus::Succeeded,
                elapsed: Duration::from_secs(4),
            },
            Outcome {
                track_id: 3,
                status: UnitStatus::Failed {
                    error: "boom".to_string(),
                },
                elapsed: Duration::from_secs(2),
            },
        ];
        let summary = BatchSummary::from_outcomes(&outcomes, Duration::from_secs(5));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.mean_elapsed, Some(Duration::from_secs(3)));
    }
}
