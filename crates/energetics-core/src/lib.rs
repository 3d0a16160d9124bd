pub mod batch;
pub mod config;
pub mod continent;
pub mod error;
pub mod export;
pub mod filter;
pub mod ingestion;
pub mod regions;
pub mod table;
pub mod tracks;

pub use batch::{
    default_worker_count, BatchProcessor, BatchReport, BatchSummary, CredentialRotator,
    FsResultStore, LecRunner, Outcome, ProcessRunner, ResultStore, UnitStatus,
};
pub use config::PipelineConfig;
pub use continent::ContinentMask;
pub use error::{PipelineError, Result};
pub use filter::{compute_land_fraction, FilterOutcome, RegionFilter, RegionReport};
pub use regions::{assign_region, BoundingBox, Region, RegionSet};
pub use table::{FilteredRow, FilteredTrackTable};
pub use tracks::{RawPoint, Track, TrackId, TrackPoint};
