use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use crate::continent::ContinentMask;
use crate::error::{InvalidTrackError, Result};
use crate::ingestion::group_by_track;
use crate::regions::{assign_region, RegionSet};
use crate::table::{FilteredRow, FilteredTrackTable};
use crate::tracks::{RawPoint, Track, TrackId, TrackPoint};

/// Fraction of a track's points that fall on land.
pub fn compute_land_fraction(
    track_id: TrackId,
    points: &[TrackPoint],
    mask: &ContinentMask,
) -> std::result::Result<f64, InvalidTrackError> {
    if points.is_empty() {
        return Err(InvalidTrackError::Empty { track_id });
    }
    let on_land = points
        .iter()
        .filter(|point| mask.contains(point.longitude, point.latitude))
        .count();
    Ok(on_land as f64 / points.len() as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retained,
    /// Genesis point outside every region.
    Unmatched,
    RegionNotAllowed,
    Continental { land_fraction: f64 },
    Malformed(InvalidTrackError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub track_id: TrackId,
    pub region: Option<String>,
    pub land_fraction: Option<f64>,
    pub decision: Decision,
}

/// Per-region genesis counts plus how many tracks each filter stage removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionReport {
    pub tracks_per_region: Vec<(String, usize)>,
    pub unmatched: usize,
    pub malformed: usize,
    pub not_allowed: usize,
    pub continental: usize,
    pub retained: usize,
}

impl RegionReport {
    fn from_classifications<'a>(
        regions: &RegionSet,
        classifications: impl Iterator<Item = &'a Classification>,
    ) -> Self {
        let mut report = RegionReport {
            tracks_per_region: regions.names().map(|name| (name.to_string(), 0)).collect(),
            ..Default::default()
        };
        for classification in classifications {
            if let Some(region) = &classification.region {
                if let Some(entry) = report
                    .tracks_per_region
                    .iter_mut()
                    .find(|(name, _)| name == region)
                {
                    entry.1 += 1;
                }
            }
            match classification.decision {
                Decision::Retained => report.retained += 1,
                Decision::Unmatched => report.unmatched += 1,
                Decision::RegionNotAllowed => report.not_allowed += 1,
                Decision::Continental { .. } => report.continental += 1,
                Decision::Malformed(_) => report.malformed += 1,
            }
        }
        report
    }

    pub fn log(&self) {
        for (region, count) in &self.tracks_per_region {
            info!(region = %region, tracks = count, "Tracks with genesis in region");
        }
        info!(
            unmatched = self.unmatched,
            malformed = self.malformed,
            not_allowed = self.not_allowed,
            continental = self.continental,
            retained = self.retained,
            "Region filtering summary"
        );
    }
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub table: FilteredTrackTable,
    pub classifications: BTreeMap<TrackId, Classification>,
    pub report: RegionReport,
}

/// Splits `items` into exactly `parts` contiguous partitions. Sizes differ by at most one and
/// the larger partitions come first; trailing partitions are empty when `parts > items.len()`.
fn partition<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    let parts = parts.max(1);
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut partitions = Vec::with_capacity(parts);
    let mut start = 0;
    for index in 0..parts {
        let len = base + usize::from(index < extra);
        partitions.push(&items[start..start + len]);
        start += len;
    }
    partitions
}

/// Classifies tracks by genesis region and drops the ones that live mostly over land.
#[derive(Debug, Clone)]
pub struct RegionFilter {
    regions: RegionSet,
    mask: Arc<ContinentMask>,
    workers: usize,
}

impl RegionFilter {
    pub fn new(regions: RegionSet, mask: Arc<ContinentMask>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self {
            regions,
            mask,
            workers,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    pub fn filter(
        &self,
        points: &[RawPoint],
        allowed_regions: &[String],
        threshold_percentage: f64,
    ) -> Result<FilterOutcome> {
        let grouped = group_by_track(points);
        let track_ids: Vec<TrackId> = grouped.keys().copied().collect();
        let threshold = threshold_percentage / 100.0;

        let partitions = partition(&track_ids, self.workers);
        info!(
            tracks = track_ids.len(),
            workers = self.workers,
            largest_partition = partitions.first().map_or(0, |part| part.len()),
            "Classifying tracks"
        );

        let pool = ThreadPoolBuilder::new().num_threads(self.workers).build()?;
        let batches: Vec<Vec<(Classification, Option<Track>)>> = pool.install(|| {
            partitions
                .into_par_iter()
                .map(|batch| {
                    batch
                        .iter()
                        .map(|track_id| {
                            self.classify(*track_id, &grouped[track_id], allowed_regions, threshold)
                        })
                        .collect()
                })
                .collect()
        });

        let mut classifications = BTreeMap::new();
        let mut retained: BTreeMap<TrackId, Track> = BTreeMap::new();
        for (classification, track) in batches.into_iter().flatten() {
            if let Some(track) = track {
                retained.insert(classification.track_id, track);
            }
            classifications.insert(classification.track_id, classification);
        }

        let mut rows = Vec::new();
        for (track_id, track) in &retained {
            let Some(region) = classifications[track_id].region.as_deref() else {
                continue;
            };
            rows.extend(
                track
                    .points()
                    .iter()
                    .map(|point| FilteredRow::from_point(point, region)),
            );
        }

        let report = RegionReport::from_classifications(&self.regions, classifications.values());
        Ok(FilterOutcome {
            table: FilteredTrackTable::from_rows(rows),
            classifications,
            report,
        })
    }

    /// Returns the track alongside its classification only when it is retained.
    fn classify(
        &self,
        track_id: TrackId,
        rows: &[RawPoint],
        allowed_regions: &[String],
        threshold: f64,
    ) -> (Classification, Option<Track>) {
        let track = match Track::from_raw(track_id, rows) {
            Ok(track) => track,
            Err(err) => {
                warn!(track_id, error = %err, "Skipping malformed track");
                return (
                    Classification {
                        track_id,
                        region: None,
                        land_fraction: None,
                        decision: Decision::Malformed(err),
                    },
                    None,
                );
            }
        };

        let Some(region) = assign_region(&track, &self.regions) else {
            return (
                Classification {
                    track_id,
                    region: None,
                    land_fraction: None,
                    decision: Decision::Unmatched,
                },
                None,
            );
        };
        let region = region.name.clone();

        if !allowed_regions.iter().any(|allowed| *allowed == region) {
            return (
                Classification {
                    track_id,
                    region: Some(region),
                    land_fraction: None,
                    decision: Decision::RegionNotAllowed,
                },
                None,
            );
        }

        let land_fraction = match compute_land_fraction(track_id, track.points(), &self.mask) {
            Ok(fraction) => fraction,
            Err(err) => {
                warn!(track_id, error = %err, "Skipping malformed track");
                return (
                    Classification {
                        track_id,
                        region: Some(region),
                        land_fraction: None,
                        decision: Decision::Malformed(err),
                    },
                    None,
                );
            }
        };

        if land_fraction >= threshold {
            return (
                Classification {
                    track_id,
                    region: Some(region),
                    land_fraction: Some(land_fraction),
                    decision: Decision::Continental { land_fraction },
                },
                None,
            );
        }

        (
            Classification {
                track_id,
                region: Some(region),
                land_fraction: Some(land_fraction),
                decision: Decision::Retained,
            },
            Some(track),
        )
    }
}
