use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tracks::{TrackId, TrackPoint};

/// One row of the filtered track table. Fields other than the track id are optional so a
/// damaged row only spoils its own track when the table is consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredRow {
    pub track_id: TrackId,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "lon vor", default, deserialize_with = "csv::invalid_option")]
    pub longitude: Option<f64>,
    #[serde(rename = "lat vor", default, deserialize_with = "csv::invalid_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "vor42", default, deserialize_with = "csv::invalid_option")]
    pub vorticity: Option<f64>,
    #[serde(default)]
    pub region: Option<String>,
}

impl FilteredRow {
    pub fn from_point(point: &TrackPoint, region: &str) -> Self {
        Self {
            track_id: point.track_id,
            date: Some(point.date.clone()),
            longitude: Some(point.longitude),
            latitude: Some(point.latitude),
            vorticity: Some(point.vorticity),
            region: Some(region.to_string()),
        }
    }
}

/// Tracks that survived region and continent filtering, one row per observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredTrackTable {
    rows: Vec<FilteredRow>,
    index: HashMap<TrackId, Vec<usize>>,
}

impl FilteredTrackTable {
    pub fn from_rows(rows: Vec<FilteredRow>) -> Self {
        let mut index: HashMap<TrackId, Vec<usize>> = HashMap::new();
        for (position, row) in rows.iter().enumerate() {
            index.entry(row.track_id).or_default().push(position);
        }
        Self { rows, index }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let rows = reader
            .deserialize::<FilteredRow>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::from_rows(rows))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> &[FilteredRow] {
        &self.rows
    }

    pub fn rows_for(&self, track_id: TrackId) -> Vec<&FilteredRow> {
        self.index
            .get(&track_id)
            .map(|positions| positions.iter().map(|&pos| &self.rows[pos]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn track_count(&self) -> usize {
        self.index.len()
    }

    /// Distinct track ids, ascending.
    pub fn track_ids(&self) -> Vec<TrackId> {
        let ids: BTreeSet<TrackId> = self.index.keys().copied().collect();
        ids.into_iter().collect()
    }

    /// Distinct track ids tagged with `region`, ascending.
    pub fn track_ids_in_region(&self, region: &str) -> Vec<TrackId> {
        let ids: BTreeSet<TrackId> = self
            .rows
            .iter()
            .filter(|row| row.region.as_deref() == Some(region))
            .map(|row| row.track_id)
            .collect();
        ids.into_iter().collect()
    }

    /// Regions in order of first appearance, each with its track ids in first-appearance order.
    pub fn tracks_by_region(&self) -> Vec<(String, Vec<TrackId>)> {
        let mut grouped: Vec<(String, Vec<TrackId>)> = Vec::new();
        for row in &self.rows {
            let Some(region) = row.region.as_deref() else {
                continue;
            };
            let position = match grouped.iter().position(|(name, _)| name == region) {
                Some(position) => position,
                None => {
                    grouped.push((region.to_string(), Vec::new()));
                    grouped.len() - 1
                }
            };
            let ids = &mut grouped[position].1;
            if !ids.contains(&row.track_id) {
                ids.push(row.track_id);
            }
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_header_with_spaces_and_tolerates_bad_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.csv");
        std::fs::write(
            &path,
            "track_id,date,lon vor,lat vor,vor42,region\n\
             1,2000-01-01 00:00:00,-45.0,-30.0,-1.5e-5,SE-BR\n\
             1,2000-01-01 06:00:00,oops,-30.5,-1.6e-5,SE-BR\n\
             2,2000-02-01 00:00:00,-60.0,-35.0,2.0e-5,LA-PLATA\n",
        )
        .unwrap();

        let table = FilteredTrackTable::read(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.track_ids(), vec![1, 2]);
        assert_eq!(table.rows_for(1)[1].longitude, None);
        assert_eq!(table.track_ids_in_region("LA-PLATA"), vec![2]);
    }

    #[test]
    fn write_then_read_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tracks.csv");
        let table = FilteredTrackTable::from_rows(vec![FilteredRow {
            track_id: 5,
            date: Some("2001-03-04 18:00:00".to_string()),
            longitude: Some(-50.25),
            latitude: Some(-28.0),
            vorticity: Some(-3.0e-5),
            region: Some("SE-BR".to_string()),
        }]);

        table.write(&path).unwrap();
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("track_id,date,lon vor,lat vor,vor42,region"));
        assert_eq!(FilteredTrackTable::read(&path).unwrap(), table);
    }
}
