use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::table::FilteredTrackTable;

/// Writes `track_ids_{region}.txt` for each region in the table, one id per line.
pub fn export_region_track_ids(
    table: &FilteredTrackTable,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;

    let mut written = Vec::new();
    for (region, track_ids) in table.tracks_by_region() {
        let path = out_dir.join(format!("track_ids_{region}.txt"));
        let mut writer = BufWriter::new(fs::File::create(&path)?);
        for track_id in &track_ids {
            writeln!(writer, "{track_id}")?;
        }
        writer.flush()?;
        info!(
            region = %region,
            tracks = track_ids.len(),
            path = %path.display(),
            "Exported track ids"
        );
        written.push(path);
    }

    Ok(written)
}
