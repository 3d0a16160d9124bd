//! Land mask used to measure how long a track stays over the continent.

use std::path::Path;

use geojson::{GeoJson, Geometry, Value as GeoJsonValue};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::regions::BoundingBox;

type Ring = Vec<(f64, f64)>;

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    exterior: Ring,
    holes: Vec<Ring>,
    bounds: BoundingBox,
}

impl Polygon {
    pub fn new(exterior: Ring, holes: Vec<Ring>) -> Self {
        let mut bounds = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for &(lon, lat) in &exterior {
            bounds.lon_min = bounds.lon_min.min(lon);
            bounds.lat_min = bounds.lat_min.min(lat);
            bounds.lon_max = bounds.lon_max.max(lon);
            bounds.lat_max = bounds.lat_max.max(lat);
        }
        Self {
            exterior,
            holes,
            bounds,
        }
    }

    /// Strict interior test: a point on the exterior or on a hole boundary is outside.
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        if !self.bounds.contains(longitude, latitude) {
            return false;
        }
        if std::iter::once(&self.exterior)
            .chain(&self.holes)
            .any(|ring| on_boundary(ring, longitude, latitude))
        {
            return false;
        }
        ring_contains(&self.exterior, longitude, latitude)
            && !self
                .holes
                .iter()
                .any(|hole| ring_contains(hole, longitude, latitude))
    }
}

/// Even-odd ray casting. Works for closed and unclosed rings.
fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn on_boundary(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    if ring.is_empty() {
        return false;
    }
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        let cross = (xj - xi) * (y - yi) - (yj - yi) * (x - xi);
        if cross == 0.0
            && x >= xi.min(xj)
            && x <= xi.max(xj)
            && y >= yi.min(yj)
            && y <= yi.max(yj)
        {
            return true;
        }
        j = i;
    }
    false
}

/// Union of land polygons, loaded once and shared read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinentMask {
    polygons: Vec<Polygon>,
}

impl ContinentMask {
    pub fn from_polygons(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let geojson = text.parse::<GeoJson>()?;
        let mask = Self::from_geojson(&geojson);
        if mask.polygons.is_empty() {
            return Err(PipelineError::EmptyContinent {
                path: path.to_path_buf(),
            });
        }
        info!(
            path = %path.display(),
            polygons = mask.polygons.len(),
            "Loaded continent geometry"
        );
        Ok(mask)
    }

    /// Collects every Polygon and MultiPolygon; other geometry kinds are ignored.
    pub fn from_geojson(geojson: &GeoJson) -> Self {
        let mut polygons = Vec::new();
        match geojson {
            GeoJson::Geometry(geometry) => collect_polygons(geometry, &mut polygons),
            GeoJson::Feature(feature) => {
                if let Some(geometry) = &feature.geometry {
                    collect_polygons(geometry, &mut polygons);
                }
            }
            GeoJson::FeatureCollection(collection) => {
                for feature in &collection.features {
                    if let Some(geometry) = &feature.geometry {
                        collect_polygons(geometry, &mut polygons);
                    }
                }
            }
        }
        Self { polygons }
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        self.polygons
            .iter()
            .any(|polygon| polygon.contains(longitude, latitude))
    }
}

fn collect_polygons(geometry: &Geometry, out: &mut Vec<Polygon>) {
    match &geometry.value {
        GeoJsonValue::Polygon(rings) => push_polygon(rings, out),
        GeoJsonValue::MultiPolygon(polygons) => {
            for rings in polygons {
                push_polygon(rings, out);
            }
        }
        GeoJsonValue::GeometryCollection(geometries) => {
            for inner in geometries {
                collect_polygons(inner, out);
            }
        }
        _ => {}
    }
}

fn push_polygon(rings: &[Vec<Vec<f64>>], out: &mut Vec<Polygon>) {
    let mut converted = rings.iter().map(|ring| {
        ring.iter()
            .filter(|position| position.len() >= 2)
            .map(|position| (position[0], position[1]))
            .collect::<Ring>()
    });
    let Some(exterior) = converted.next() else {
        return;
    };
    out.push(Polygon::new(exterior, converted.collect()));
}
