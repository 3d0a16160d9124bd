use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::regions::{Region, RegionSet};

pub const DEFAULT_THRESHOLD_PERCENTAGE: f64 = 80.0;
pub const DEFAULT_ROTATION_BATCH_SIZE: usize = 50;

/// Settings shared by every subcommand. Any field left out of the TOML file keeps its default,
/// and command-line flags override what the file says.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Replaces the South Atlantic region table; file order is match order.
    pub regions: Option<Vec<Region>>,
    pub select: SelectConfig,
    pub lec: LecConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectConfig {
    pub allowed_regions: Vec<String>,
    pub threshold_percentage: f64,
    pub workers: Option<usize>,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            allowed_regions: vec!["ARG".into(), "LA-PLATA".into(), "SE-BR".into()],
            threshold_percentage: DEFAULT_THRESHOLD_PERCENTAGE,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LecConfig {
    pub program: String,
    pub script: Option<PathBuf>,
    /// Defaults to the directory holding `script`.
    pub working_dir: Option<PathBuf>,
    /// Defaults to `LEC_Results` under the working directory.
    pub results_dir: Option<PathBuf>,
    pub inputs_dir: PathBuf,
    pub region: String,
    pub limit: Option<usize>,
    pub workers: Option<usize>,
    pub rotation_batch_size: usize,
    pub credential_target: Option<PathBuf>,
    pub credential_candidates: Vec<PathBuf>,
}

impl Default for LecConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            script: None,
            working_dir: None,
            results_dir: None,
            inputs_dir: PathBuf::from("inputs"),
            region: "SE-BR".to_string(),
            limit: None,
            workers: None,
            rotation_batch_size: DEFAULT_ROTATION_BATCH_SIZE,
            credential_target: None,
            credential_candidates: Vec::new(),
        }
    }
}

impl LecConfig {
    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.script
                .as_deref()
                .and_then(Path::parent)
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
    }

    pub fn resolved_results_dir(&self) -> PathBuf {
        self.results_dir.clone().unwrap_or_else(|| {
            self.resolved_working_dir()
                .unwrap_or_default()
                .join("LEC_Results")
        })
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn region_set(&self) -> Result<RegionSet> {
        match &self.regions {
            Some(regions) => RegionSet::new(regions.clone()),
            None => Ok(RegionSet::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let regions = self.region_set()?;
        regions.check_allowed(&self.select.allowed_regions)?;

        let threshold = self.select.threshold_percentage;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(PipelineError::Config(format!(
                "threshold_percentage must be in (0, 100], got {threshold}"
            )));
        }
        if self.lec.rotation_batch_size == 0 {
            return Err(PipelineError::Config(
                "rotation_batch_size must be at least 1".to_string(),
            ));
        }
        if self.select.workers == Some(0) || self.lec.workers == Some(0) {
            return Err(PipelineError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.select.threshold_percentage, 80.0);
        assert_eq!(config.lec.rotation_batch_size, 50);
        assert_eq!(config.region_set().unwrap(), RegionSet::default());
    }

    #[test]
    fn custom_regions_replace_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [[regions]]
            name = "NORTH"
            lon_min = -10.0
            lat_min = 0.0
            lon_max = 10.0
            lat_max = 20.0

            [select]
            allowed_regions = ["NORTH"]
            threshold_percentage = 95.0
            "#,
        )
        .unwrap();

        let regions = config.region_set().unwrap();
        assert_eq!(regions.names().collect::<Vec<_>>(), ["NORTH"]);
        assert_eq!(config.select.threshold_percentage, 95.0);
    }

    #[test]
    fn rejects_unknown_allowed_region() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [select]
            allowed_regions = ["ATLANTIS"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn rejects_zero_rotation_batch() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [lec]
            rotation_batch_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn results_dir_follows_script_location() {
        let lec = LecConfig {
            script: Some(PathBuf::from("/opt/lorenz-cycle/lorenz_cycle.py")),
            ..Default::default()
        };
        assert_eq!(
            lec.resolved_results_dir(),
            PathBuf::from("/opt/lorenz-cycle/LEC_Results")
        );
    }
}
