use std::{env, fmt, fs, io, path, str::FromStr};

use detector::{ClusterInfo, SchedulerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),

    #[error("neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterInfo,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub fixture: Fixture,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    /// Inventory file served by the offline backend, relative to the config
    /// file unless absolute
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/problem-detector/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("problem-detector/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterInfo { name: "local".into(), ..ClusterInfo::default() },
            scheduler: SchedulerConfig::default(),
            fixture: Fixture { path: "fixture.toml".into() },
            log: Log::default(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Detector Configuration:")?;
        write_title_1(f, "Cluster")?;
        write_1(f, "Name", &self.cluster.name)?;
        write_1(f, "Version", &self.cluster.version)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Parallel Calls", &self.scheduler.parallel_calls)?;
        write_1(f, "Queue Capacity", &self.scheduler.queue_capacity)?;
        write_1(f, "Call Timeout (s)", &self.scheduler.call_timeout_secs)?;
        write_1(f, "Run Timeout (s)", &self.scheduler.run_timeout_secs)?;
        write_1(f, "Interval (s)", &self.scheduler.interval_secs)?;
        write_title_1(f, "Fixture")?;
        write_1(f, "Path", &self.fixture.path.display())?;
        write_title_1(f, "Log")?;
        write_1(f, "Level", &self.log.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/problem-detector/config.toml
    /// or the specified path, with the name config.toml if one does not exist.
    /// A relative fixture path is resolved against the config's directory.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str::<Self>(raw_string.as_str())
                .map_err(|source| Error::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.log_level()?;
        if config.fixture.path.is_relative() {
            if let Some(dir) = config_path.parent() {
                config.fixture.path = dir.join(&config.fixture.path);
            }
        }
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    pub fn log_level(&self) -> Result<LevelFilter, Error> {
        LevelFilter::from_str(&self.log.level)
            .map_err(|_err| Error::InvalidLogLevel(self.log.level.clone()))
    }
}
