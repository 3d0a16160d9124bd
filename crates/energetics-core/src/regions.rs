use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::tracks::Track;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub const fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        self.lon_min <= longitude
            && longitude <= self.lon_max
            && self.lat_min <= latitude
            && latitude <= self.lat_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    #[serde(flatten)]
    pub bounds: BoundingBox,
}

impl Region {
    pub fn new(name: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            name: name.into(),
            bounds,
        }
    }
}

/// Genesis regions in match order. When boxes overlap, the earlier entry wins.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSet {
    regions: Vec<Region>,
}

static SOUTH_ATLANTIC: Lazy<RegionSet> = Lazy::new(|| RegionSet {
    regions: vec![
        Region::new("SE-BR", BoundingBox::new(-52.0, -38.0, -37.0, -23.0)),
        Region::new("LA-PLATA", BoundingBox::new(-69.0, -38.0, -52.0, -23.0)),
        Region::new("ARG", BoundingBox::new(-70.0, -55.0, -50.0, -39.0)),
        Region::new("SE-SAO", BoundingBox::new(-15.0, -55.0, 30.0, -37.0)),
        Region::new("SA-NAM", BoundingBox::new(8.0, -33.0, 20.0, -21.0)),
        Region::new("AT-PEN", BoundingBox::new(-65.0, -69.0, -44.0, -58.0)),
        Region::new("WEDDELL", BoundingBox::new(-65.0, -85.0, -10.0, -72.0)),
    ],
});

impl Default for RegionSet {
    fn default() -> Self {
        SOUTH_ATLANTIC.clone()
    }
}

impl RegionSet {
    pub fn new(regions: Vec<Region>) -> Result<Self> {
        if regions.is_empty() {
            return Err(PipelineError::Config("region set is empty".to_string()));
        }
        for (index, region) in regions.iter().enumerate() {
            if regions[..index].iter().any(|other| other.name == region.name) {
                return Err(PipelineError::Config(format!(
                    "region {} is defined twice",
                    region.name
                )));
            }
            let bounds = &region.bounds;
            if bounds.lon_min > bounds.lon_max || bounds.lat_min > bounds.lat_max {
                return Err(PipelineError::Config(format!(
                    "region {} has inverted bounds",
                    region.name
                )));
            }
        }
        Ok(Self { regions })
    }

    /// The seven South Atlantic genesis regions.
    pub fn south_atlantic() -> &'static RegionSet {
        &SOUTH_ATLANTIC
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|region| region.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|region| region.name == name)
    }

    /// First region containing the point, in enumeration order.
    pub fn locate(&self, longitude: f64, latitude: f64) -> Option<&Region> {
        self.regions
            .iter()
            .find(|region| region.bounds.contains(longitude, latitude))
    }

    /// Fails when an allowed name is not part of this set.
    pub fn check_allowed(&self, allowed: &[String]) -> Result<()> {
        for name in allowed {
            if self.get(name).is_none() {
                return Err(PipelineError::Config(format!(
                    "unknown region {name}; known regions: {}",
                    self.names().collect::<Vec<_>>().join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Genesis region of a track. Only the first observation is consulted.
pub fn assign_region<'a>(track: &Track, regions: &'a RegionSet) -> Option<&'a Region> {
    let genesis = track.first();
    regions.locate(genesis.longitude, genesis.latitude)
}
