use std::path::Path;

use crate::equations::{EnergyEquation, WidthEquation};
use crate::error::{GaussError, Result};
use crate::fitter::FitParms;
use crate::region_search::{RegionSearchMode, RegionSearchParms};
use crate::spectrum::ChannelRange;

/// How eagerly peaks and regions are reported. Higher sensitivity means lower thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Cross-correlation threshold used by the peak search.
    pub fn peak_threshold(&self) -> i32 {
        match self {
            Sensitivity::Low => 20,
            Sensitivity::Medium => 10,
            Sensitivity::High => 5,
        }
    }

    /// Sigmas above background used by the region search.
    pub fn region_threshold(&self) -> f64 {
        match self {
            Sensitivity::Low => 3.0,
            Sensitivity::Medium => 2.0,
            Sensitivity::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    pub irw: i32,
    pub irch: i32,
    pub max_width: i32,
    pub mode: RegionSearchMode,
    pub max_regions: usize,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            irw: 3,
            irch: 2,
            max_width: 150,
            mode: RegionSearchMode::ForPeaks,
            max_regions: 200,
        }
    }
}

/// Everything one analysis run needs besides the spectrum itself.
///
/// Every field has a default, so a YAML file only has to name what it changes:
///
/// ```yaml
/// sensitivity: High
/// energy: { a: 0.0, b: 0.5 }
/// fit:
///   ncycle: 5
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sensitivity: Sensitivity,
    /// Channels to analyse, the whole spectrum when absent.
    pub search_range: Option<ChannelRange>,
    pub region: RegionSettings,
    pub fit: FitParms,
    pub plots_per_channel: usize,
    pub energy: EnergyEquation,
    pub width: WidthEquation,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::default(),
            search_range: None,
            region: RegionSettings::default(),
            fit: FitParms::default(),
            plots_per_channel: 4,
            energy: EnergyEquation::default(),
            width: WidthEquation::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: AnalysisConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&yaml)?;
        log::info!("Loaded analysis configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn peak_threshold(&self) -> i32 {
        self.sensitivity.peak_threshold()
    }

    pub fn region_search_parms(&self) -> RegionSearchParms {
        RegionSearchParms {
            threshold: self.sensitivity.region_threshold(),
            irw: self.region.irw,
            irch: self.region.irch,
            mode: self.region.mode,
            max_width: self.region.max_width,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.plots_per_channel == 0 {
            return Err(GaussError::InvalidInput(
                "plots_per_channel must be at least 1".to_owned(),
            ));
        }
        if self.region.max_regions == 0 {
            return Err(GaussError::InvalidInput(
                "region capacity must be at least 1".to_owned(),
            ));
        }
        if self.fit.ncycle == 0 || self.fit.nout == 0 || self.fit.max_npeaks == 0 {
            return Err(GaussError::InvalidInput(
                "ncycle, nout and max_npeaks must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
