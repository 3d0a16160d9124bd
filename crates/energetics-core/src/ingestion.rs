use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::tracks::{RawPoint, TrackId};

/// Column order of the headerless raw track files.
const RAW_COLUMNS: [&str; 5] = ["track_id", "date", "lon vor", "lat vor", "vor42"];

/// Reads every raw track file matching `pattern`, in sorted path order.
pub fn read_raw_tracks(pattern: &str) -> Result<Vec<RawPoint>> {
    let mut paths = glob::glob(pattern)?.collect::<std::result::Result<Vec<PathBuf>, _>>()?;
    if paths.is_empty() {
        return Err(PipelineError::NoTrackFiles(pattern.to_string()));
    }
    paths.sort();

    info!(files = paths.len(), "Reading raw track files");
    let mut points = Vec::new();
    for path in &paths {
        points.extend(read_raw_track_file(path)?);
    }
    info!(rows = points.len(), "Merged raw track files");

    Ok(points)
}

pub fn read_raw_track_file(path: &Path) -> Result<Vec<RawPoint>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;

    let mut points = Vec::new();
    for (line_index, record) in reader.records().enumerate() {
        let record = record?;
        match raw_point_from_record(&record) {
            Some(point) => points.push(point),
            None => warn!(
                path = %path.display(),
                line = line_index + 1,
                "Dropping raw track row without a usable track id"
            ),
        }
    }

    Ok(points)
}

fn raw_point_from_record(record: &StringRecord) -> Option<RawPoint> {
    if record.len() < RAW_COLUMNS.len() {
        return None;
    }
    let track_id = record.get(0)?.parse::<TrackId>().ok()?;
    let field = |index: usize| record.get(index).unwrap_or_default().to_string();

    Some(RawPoint {
        track_id,
        date: field(1),
        longitude: field(2),
        latitude: field(3),
        vorticity: field(4),
    })
}

/// Groups rows by track id; rows keep their file order within a track.
pub fn group_by_track(points: &[RawPoint]) -> BTreeMap<TrackId, Vec<RawPoint>> {
    let mut grouped: BTreeMap<TrackId, Vec<RawPoint>> = BTreeMap::new();
    for point in points {
        grouped.entry(point.track_id).or_default().push(point.clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_and_bad_ids_are_dropped() {
        let good = StringRecord::from(vec!["7", "2000-01-01 00:00:00", "300", "-30", "-1e-5"]);
        let short = StringRecord::from(vec!["7", "2000-01-01 00:00:00"]);
        let bad_id = StringRecord::from(vec!["x", "2000-01-01 00:00:00", "300", "-30", "1"]);

        assert_eq!(raw_point_from_record(&good).unwrap().track_id, 7);
        assert!(raw_point_from_record(&short).is_none());
        assert!(raw_point_from_record(&bad_id).is_none());
    }
}
