use chrono::{NaiveDate, NaiveDateTime};

use crate::error::InvalidTrackError;

pub type TrackId = i64;

/// Timestamp layouts seen in the track databases, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d-%H%M",
    "%Y%m%d%H%M",
];

/// One row as read from disk. Only the track id has been parsed so far.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
    pub track_id: TrackId,
    pub date: String,
    pub longitude: String,
    pub latitude: String,
    pub vorticity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub track_id: TrackId,
    /// Timestamp text exactly as it appeared in the source file.
    pub date: String,
    pub timestamp: NaiveDateTime,
    pub longitude: f64,
    pub latitude: f64,
    pub vorticity: f64,
}

impl RawPoint {
    pub fn parse(&self) -> Result<TrackPoint, InvalidTrackError> {
        let timestamp =
            parse_timestamp(&self.date).ok_or_else(|| InvalidTrackError::Timestamp {
                track_id: self.track_id,
                value: self.date.clone(),
            })?;
        let longitude = parse_field(&self.longitude).ok_or_else(|| {
            InvalidTrackError::Coordinate {
                track_id: self.track_id,
                field: "longitude",
                value: self.longitude.clone(),
            }
        })?;
        let latitude =
            parse_field(&self.latitude).ok_or_else(|| InvalidTrackError::Coordinate {
                track_id: self.track_id,
                field: "latitude",
                value: self.latitude.clone(),
            })?;
        let vorticity =
            parse_field(&self.vorticity).ok_or_else(|| InvalidTrackError::Vorticity {
                track_id: self.track_id,
                value: self.vorticity.clone(),
            })?;

        Ok(TrackPoint {
            track_id: self.track_id,
            date: self.date.clone(),
            timestamp,
            longitude: normalize_longitude(longitude),
            latitude,
            vorticity,
        })
    }
}

/// Maps 0..360 longitudes onto -180..180.
pub fn normalize_longitude(longitude: f64) -> f64 {
    if longitude > 180.0 {
        longitude - 360.0
    } else {
        longitude
    }
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn parse_field(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Time-ordered observations of one system. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    track_id: TrackId,
    points: Vec<TrackPoint>,
}

impl Track {
    pub fn new(track_id: TrackId, mut points: Vec<TrackPoint>) -> Result<Self, InvalidTrackError> {
        if points.is_empty() {
            return Err(InvalidTrackError::Empty { track_id });
        }
        points.sort_by_key(|point| point.timestamp);
        Ok(Self { track_id, points })
    }

    pub fn from_raw(track_id: TrackId, rows: &[RawPoint]) -> Result<Self, InvalidTrackError> {
        let points = rows
            .iter()
            .map(RawPoint::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(track_id, points)
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    /// Genesis point: the earliest observation.
    pub fn first(&self) -> &TrackPoint {
        &self.points[0]
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
