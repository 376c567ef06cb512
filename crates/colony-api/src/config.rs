//! Engine configuration from a TOML file plus the environment variables the
//! command line driver honours.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use contracts::EngineConfig;

pub const ENV_CONFIG_PATH: &str = "COLONY_CONFIG";
pub const ENV_STORE_PATH: &str = "COLONY_STORE_PATH";
pub const DEFAULT_STORE_PATH: &str = "colony_world.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ReadConfigFile { path: String, message: String },
    ParseConfigFile { path: String, message: String },
    Invalid { path: String, problems: Vec<String> },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadConfigFile { path, message } => {
                write!(f, "failed to read config file {path}: {message}")
            }
            Self::ParseConfigFile { path, message } => {
                write!(f, "failed to parse config file {path}: {message}")
            }
            Self::Invalid { path, problems } => {
                write!(f, "config file {path} is invalid: {}", problems.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where the driver finds its config and its world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColonyPaths {
    pub config_path: Option<PathBuf>,
    pub store_path: PathBuf,
}

impl ColonyPaths {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    fn from_env_with<F>(mut getter: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let config_path = getter(ENV_CONFIG_PATH)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let store_path = getter(ENV_STORE_PATH)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string());

        Self {
            config_path,
            store_path: PathBuf::from(store_path),
        }
    }

    /// Config from `config_path`, or the defaults when none is set.
    pub fn load_config(&self) -> Result<EngineConfig, ConfigError> {
        match &self.config_path {
            Some(path) => load_config(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

/// Parses and validates a TOML config. Missing keys take their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    parse_config(path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|err| ConfigError::ParseConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;

    let problems = config.validate();
    if !problems.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            problems,
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parses_full_config() {
        let content = r#"
tick_interval_secs = 2.5
low_resource_threshold = 15
failure_probability = 0.02
failure_seed = "42"
persistence_timeout_ms = 500

[initial_resources]
energy = 100
materials = 10

[[tasks]]
name = "Scavenge"
duration_ticks = 2
generates = { materials = 5 }

[[tasks]]
name = "Fabricate"
duration_ticks = 4
prerequisites = ["Scavenge"]
costs = { materials = 5 }
rewards = { energy = 3 }
"#;

        let config = parse_config(Path::new("colony.toml"), content).expect("parses");
        assert_eq!(config.tick_interval_secs, 2.5);
        assert_eq!(config.low_resource_threshold, 15);
        assert_eq!(config.failure_seed, Some(42));
        assert_eq!(config.persistence_timeout_ms, 500);
        assert_eq!(
            config.initial_resources,
            BTreeMap::from([("energy".to_string(), 100), ("materials".to_string(), 10)])
        );
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0].rewards.get("materials"), Some(&5));
        assert_eq!(config.tasks[1].prerequisites, vec!["Scavenge".to_string()]);
    }

    #[test]
    fn empty_file_means_defaults() {
        let config = parse_config(Path::new("empty.toml"), "").expect("parses");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn invalid_values_are_reported_together() {
        let err = parse_config(
            Path::new("bad.toml"),
            "tick_interval_secs = -1.0\nfailure_probability = 2.0\n",
        )
        .expect_err("invalid");
        match err {
            ConfigError::Invalid { problems, .. } => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = parse_config(Path::new("broken.toml"), "tick_interval_secs = [").expect_err("broken");
        assert!(matches!(err, ConfigError::ParseConfigFile { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_config("/nonexistent/colony.toml").expect_err("missing");
        assert!(matches!(err, ConfigError::ReadConfigFile { .. }));
    }

    #[test]
    fn paths_fall_back_to_defaults() {
        let paths = ColonyPaths::from_env_with(|_| None);
        assert_eq!(paths.config_path, None);
        assert_eq!(paths.store_path, PathBuf::from(DEFAULT_STORE_PATH));

        let paths = ColonyPaths::from_env_with(|key| match key {
            ENV_CONFIG_PATH => Some("missing-colony.toml".to_string()),
            ENV_STORE_PATH => Some("world.json".to_string()),
            _ => None,
        });
        assert_eq!(paths.config_path, Some(PathBuf::from("missing-colony.toml")));
        assert_eq!(paths.store_path, PathBuf::from("world.json"));
        assert!(matches!(
            paths.load_config(),
            Err(ConfigError::ReadConfigFile { .. })
        ));
    }
}
