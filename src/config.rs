use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub mod logging;
pub mod maven;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod tests;

pub use logging::LoggingConfig;
pub use maven::MavenConfig;
pub use server::ServerConfig;
pub use upstream::UpstreamConfig;

pub const DEFAULT_CONFIG_FILE: &str = "m2proxy.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub maven: MavenConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where this configuration came from, reported once logging is up.
    #[serde(skip)]
    pub source: ConfigSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::Missing(PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            Self::File(path) => {
                tracing::info!(path = %path.display(), "loaded configuration file");
            }
            Self::Missing(path) => {
                tracing::warn!(
                    path = %path.display(),
                    "configuration file not found, using defaults"
                );
            }
        }
    }
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config
                .maven
                .normalize_paths(candidate.parent().unwrap_or(Path::new(".")));
            config.source = ConfigSource::File(candidate);
            Ok(config)
        } else {
            let mut config = Config::default();
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.maven.normalize_paths(&cwd);
            config.source = ConfigSource::Missing(candidate);
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be greater than zero");
        }
        if self.upstream.connect_timeout_secs == 0 {
            bail!("upstream.connect_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
