use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Where repository declarations and the local repository live.
///
/// Unset paths fall back to the usual locations under `~/.m2`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MavenConfig {
    /// Maven `settings.xml` with servers, repositories and mirrors
    #[serde(default)]
    pub settings: Option<PathBuf>,
    /// Local repository consulted before going upstream
    #[serde(default)]
    pub local_repository: Option<PathBuf>,
    /// YAML file with repository overrides (`mavenRepositories`)
    #[serde(default)]
    pub proxy_config: Option<PathBuf>,
}

impl MavenConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.settings,
            &mut self.local_repository,
            &mut self.proxy_config,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    pub fn settings_path(&self) -> Option<PathBuf> {
        self.settings
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".m2").join("settings.xml")))
    }

    pub fn local_repository_path(&self) -> Option<PathBuf> {
        self.local_repository
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".m2").join("repository")))
    }

    /// True when the local repository was configured rather than defaulted.
    pub fn local_repository_is_explicit(&self) -> bool {
        self.local_repository.is_some()
    }
}
