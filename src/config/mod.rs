//! Configuration types for the EVT pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Geometric calibration parameters for particle classification.
///
/// `notch1`, `notch2` and `origin` may be left unset, which signals that
/// they should be derived from the data (per file in one-pass mode, from
/// the whole cruise in two-pass mode). `width` and `offset` always have
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Acceptance notch for the D1 detector, as a ratio against fsc_small
    #[serde(default)]
    pub notch1: Option<f64>,

    /// Acceptance notch for the D2 detector, as a ratio against fsc_small
    #[serde(default)]
    pub notch2: Option<f64>,

    /// Width of the alignment envelope
    #[serde(default = "default_width")]
    pub width: f64,

    /// Center of the D2 - D1 alignment distribution
    #[serde(default)]
    pub origin: Option<f64>,

    /// Additive signal offset applied before notch comparison
    #[serde(default)]
    pub offset: f64,
}

fn default_width() -> f64 {
    1.0
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            notch1: None,
            notch2: None,
            width: default_width(),
            origin: None,
            offset: 0.0,
        }
    }
}

impl FilterParams {
    /// True when every derivable field has a value.
    pub fn is_resolved(&self) -> bool {
        self.notch1.is_some() && self.notch2.is_some() && self.origin.is_some()
    }

    /// Convert to a fully-specified parameter set, or `None` if any
    /// derivable field is still unset.
    pub fn resolved(&self) -> Option<ResolvedParams> {
        Some(ResolvedParams {
            notch1: self.notch1?,
            notch2: self.notch2?,
            width: self.width,
            origin: self.origin?,
            offset: self.offset,
        })
    }
}

/// A fully-specified calibration set. Guarantees by construction that no
/// field remains to be derived, which is the precondition for the second
/// pass of two-pass filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub notch1: f64,
    pub notch2: f64,
    pub width: f64,
    pub origin: f64,
    pub offset: f64,
}

impl From<ResolvedParams> for FilterParams {
    fn from(p: ResolvedParams) -> Self {
        Self {
            notch1: Some(p.notch1),
            notch2: Some(p.notch2),
            width: p.width,
            origin: Some(p.origin),
            offset: p.offset,
        }
    }
}

/// Execution settings for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Progress update resolution in percent
    #[serde(default = "default_resolution")]
    pub resolution: f64,

    /// Abort two-pass calibration when any exploratory file fails
    #[serde(default)]
    pub strict_explore: bool,
}

fn default_workers() -> usize {
    1
}

fn default_resolution() -> f64 {
    10.0
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resolution: default_resolution(),
            strict_explore: false,
        }
    }
}

/// Access parameters for a remote object store.
///
/// Passed explicitly to the remote-store collaborator at construction time;
/// there is no global credentials singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bucket holding cruise data, e.g. `file:///data/mirror`
    pub bucket: String,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,
}

impl RemoteConfig {
    /// True when both access parameters are present.
    pub fn has_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub filter: FilterParams,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_params() {
        let params = FilterParams::default();
        assert_eq!(params.width, 1.0);
        assert_eq!(params.offset, 0.0);
        assert!(!params.is_resolved());
        assert!(params.resolved().is_none());
    }

    #[test]
    fn test_resolved_round_trip() {
        let full = ResolvedParams {
            notch1: 0.7,
            notch2: 0.8,
            width: 1.0,
            origin: -12.0,
            offset: 0.0,
        };
        let params: FilterParams = full.into();
        assert!(params.is_resolved());
        assert_eq!(params.resolved(), Some(full));
    }

    #[test]
    fn test_yaml_partial_params() {
        let config: PipelineConfig =
            serde_yaml::from_str("filter:\n  notch1: 0.5\n").unwrap();
        assert_eq!(config.filter.notch1, Some(0.5));
        assert_eq!(config.filter.notch2, None);
        assert_eq!(config.filter.width, 1.0);
        assert_eq!(config.run.resolution, 10.0);
    }

    #[test]
    fn test_remote_credentials() {
        let remote = RemoteConfig {
            bucket: "file:///tmp/bucket".to_string(),
            access_key: Some("key".to_string()),
            secret_key: None,
        };
        assert!(!remote.has_credentials());
    }
}
