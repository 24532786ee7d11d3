// ⚙️ Configuration - JSON file, then FOOTPRINT_* environment overrides

use crate::aggregator::{AggregateOptions, CandidateMode, DEFAULT_TRIALS};
use crate::error::FootprintError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SNAPSHOT_DIR: &str = "FOOTPRINT_SNAPSHOT_DIR";
pub const ENV_CBP_DATABASE: &str = "FOOTPRINT_CBP_DATABASE";
pub const ENV_IMPACTS_DATABASE: &str = "FOOTPRINT_IMPACTS_DATABASE";
pub const ENV_TRIALS: &str = "FOOTPRINT_TRIALS";
pub const ENV_CANDIDATE_MODE: &str = "FOOTPRINT_CANDIDATE_MODE";
pub const ENV_SEED: &str = "FOOTPRINT_SEED";
pub const ENV_BIND_ADDR: &str = "FOOTPRINT_BIND_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FootprintConfig {
    /// Directory holding the crosswalk and impact matrix CSVs
    pub snapshot_dir: PathBuf,
    /// County Business Patterns database
    pub cbp_database: PathBuf,
    /// Rollup output database
    pub impacts_database: PathBuf,
    pub trials: u32,
    pub candidate_mode: CandidateMode,
    pub seed: Option<u64>,
    pub bind_addr: String,
}

impl Default for FootprintConfig {
    fn default() -> Self {
        FootprintConfig {
            snapshot_dir: PathBuf::from("data/snapshot"),
            cbp_database: PathBuf::from("cbp.sqlite3"),
            impacts_database: PathBuf::from("impacts.sqlite3"),
            trials: DEFAULT_TRIALS,
            candidate_mode: CandidateMode::default(),
            seed: None,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl FootprintConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: FootprintConfig = serde_json::from_str(&content)
            .context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// File (or defaults), then environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_SNAPSHOT_DIR) {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_CBP_DATABASE) {
            self.cbp_database = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_IMPACTS_DATABASE) {
            self.impacts_database = PathBuf::from(path);
        }
        if let Some(trials) = lookup(ENV_TRIALS) {
            self.trials = trials.trim().parse().map_err(|_| {
                FootprintError::invalid_parameter(format!("{} must be a positive integer, got '{}'", ENV_TRIALS, trials))
            })?;
        }
        if let Some(mode) = lookup(ENV_CANDIDATE_MODE) {
            self.candidate_mode = mode.parse()?;
        }
        if let Some(seed) = lookup(ENV_SEED) {
            self.seed = Some(seed.trim().parse().map_err(|_| {
                FootprintError::invalid_parameter(format!("{} must be an unsigned integer, got '{}'", ENV_SEED, seed))
            })?);
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = addr;
        }

        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), FootprintError> {
        if self.trials == 0 {
            return Err(FootprintError::invalid_parameter("trials must be a positive integer"));
        }
        if self.bind_addr.trim().is_empty() {
            return Err(FootprintError::invalid_parameter("bind_addr is empty"));
        }
        Ok(())
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            trials: self.trials,
            candidate_mode: self.candidate_mode,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FootprintConfig::default();
        assert_eq!(config.trials, 100);
        assert_eq!(config.candidate_mode, CandidateMode::Ambiguous);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"snapshot_dir": "/srv/useeio", "trials": 50, "candidate_mode": "disambiguated"}}"#).unwrap();

        let config = FootprintConfig::from_file(file.path()).unwrap();
        assert_eq!(config.snapshot_dir, PathBuf::from("/srv/useeio"));
        assert_eq!(config.trials, 50);
        assert_eq!(config.candidate_mode, CandidateMode::Disambiguated);
        assert_eq!(config.cbp_database, PathBuf::from("cbp.sqlite3"));
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(FootprintConfig::from_file(file.path()).is_err());
        assert!(FootprintConfig::from_file("/nonexistent/footprint.json").is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = FootprintConfig::default();
        config
            .apply_overrides(lookup_from(&[
                (ENV_TRIALS, "250"),
                (ENV_CANDIDATE_MODE, "Disambiguated"),
                (ENV_SEED, "42"),
                (ENV_IMPACTS_DATABASE, "/tmp/impacts.db"),
            ]))
            .unwrap();

        assert_eq!(config.trials, 250);
        assert_eq!(config.candidate_mode, CandidateMode::Disambiguated);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.impacts_database, PathBuf::from("/tmp/impacts.db"));

        let options = config.aggregate_options();
        assert_eq!(options.trials, 250);
        assert_eq!(options.seed, Some(42));
    }

    #[test]
    fn test_bad_overrides_are_invalid_parameters() {
        for (key, value) in [(ENV_TRIALS, "many"), (ENV_CANDIDATE_MODE, "random"), (ENV_SEED, "-1")] {
            let mut config = FootprintConfig::default();
            let err = config.apply_overrides(lookup_from(&[(key, value)])).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<FootprintError>(),
                Some(FootprintError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_zero_trials_rejected() {
        let config = FootprintConfig {
            trials: 0,
            ..FootprintConfig::default()
        };
        assert!(matches!(config.validate(), Err(FootprintError::InvalidParameter(_))));
    }
}
