// crates/energetics-core/src/error.rs

use std::path::PathBuf;

use thiserror::Error;

use crate::tracks::TrackId;

/// Failures that abort a whole run. Everything per-track or per-unit has its own type below.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Could not read path from glob pattern: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("TOML configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("no raw track files matched {0}")]
    NoTrackFiles(String),

    #[error("continent geometry {path} contained no polygons")]
    EmptyContinent { path: PathBuf },

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidTrackError {
    #[error("track {track_id} has no points")]
    Empty { track_id: TrackId },

    #[error("track {track_id} has an unparseable timestamp {value:?}")]
    Timestamp { track_id: TrackId, value: String },

    #[error("track {track_id} has an unparseable {field} {value:?}")]
    Coordinate {
        track_id: TrackId,
        field: &'static str,
        value: String,
    },

    #[error("track {track_id} has an unparseable vorticity {value:?}")]
    Vorticity { track_id: TrackId, value: String },
}

#[derive(Debug, Error)]
pub enum InputPreparationError {
    #[error("no rows for track {track_id} in the filtered table")]
    NoRows { track_id: TrackId },

    #[error("track {track_id} row {row} is missing {field}")]
    MissingField {
        track_id: TrackId,
        row: usize,
        field: &'static str,
    },

    #[error("track {track_id} row {row} has a non-finite {field}: {value}")]
    NonFinite {
        track_id: TrackId,
        row: usize,
        field: &'static str,
        value: f64,
    },

    #[error("failed to write input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode input file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExternalComputationError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    NonZeroExit { program: String, code: Option<i32> },
}

#[derive(Debug, Error)]
pub enum CredentialRotationError {
    #[error("no credential candidates configured")]
    NoCandidates,

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a dispatched unit ended up `Failed`.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    InputPreparation(#[from] InputPreparationError),

    #[error(transparent)]
    ExternalComputation(#[from] ExternalComputationError),
}
