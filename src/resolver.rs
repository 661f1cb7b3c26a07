//! Merges settings, mirrors and overrides into the repository table.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::settings::MavenSettings;

pub const CENTRAL_ID: &str = "central";
pub const CENTRAL_URL: &str = "https://repo.maven.apache.org/maven2";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"******")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTarget {
    pub id: String,
    pub base_url: Url,
    pub credentials: Option<Credentials>,
}

impl RepositoryTarget {
    /// Base URL with any trailing slash removed, ready for path concatenation.
    pub fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid repository override '{id}': {reason}")]
    InvalidOverride { id: String, reason: String },
}

#[derive(Clone, Deserialize)]
pub struct RepositoryOverride {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl RepositoryOverride {
    fn credentials(&self) -> Option<Credentials> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.trim().is_empty() => {
                Some(Credentials::new(user, pass))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for RepositoryOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryOverride")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .finish()
    }
}

/// Repository overrides from the proxy configuration YAML.
#[derive(Debug, Clone, Default)]
pub struct OverrideSource {
    pub repositories: IndexMap<String, RepositoryOverride>,
}

#[derive(Deserialize)]
struct RawOverrideFile {
    #[serde(rename = "mavenRepositories", default)]
    maven_repositories: Option<IndexMap<String, RepositoryOverride>>,
}

impl OverrideSource {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: RawOverrideFile =
            serde_yaml::from_str(raw).context("invalid proxy configuration")?;
        Ok(Self {
            repositories: file.maven_repositories.unwrap_or_default(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read proxy configuration {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("loading {}", path.display()))
    }
}

/// Ordered id → target mapping, fixed after resolution.
#[derive(Debug, Clone, Default)]
pub struct RepositoryTable {
    targets: IndexMap<String, RepositoryTarget>,
}

impl RepositoryTable {
    pub fn get(&self, id: &str) -> Option<&RepositoryTarget> {
        self.targets.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepositoryTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn listing(&self) -> String {
        if self.targets.is_empty() {
            return "No repositories configured.\n".to_string();
        }

        let mut out = String::from("Repository Mappings\n-------------------\n");
        for target in self.targets.values() {
            out.push_str(&format!("{} --> {}\n", target.id, target.base()));
        }
        out
    }
}

impl FromIterator<RepositoryTarget> for RepositoryTable {
    fn from_iter<I: IntoIterator<Item = RepositoryTarget>>(iter: I) -> Self {
        Self {
            targets: iter
                .into_iter()
                .map(|target| (target.id.clone(), target))
                .collect(),
        }
    }
}

/// Builds the repository table.
///
/// Order of precedence, lowest first: settings repositories (plus the
/// injected `central`), mirrors in declaration order, then overrides.
pub fn resolve(
    settings: Option<&MavenSettings>,
    overrides: Option<&OverrideSource>,
) -> Result<RepositoryTable, ResolveError> {
    let empty = MavenSettings::default();
    let settings = settings.unwrap_or(&empty);

    let credentials: HashMap<&str, Credentials> = settings
        .servers
        .iter()
        .map(|server| {
            (
                server.id.as_str(),
                Credentials::new(&server.username, &server.password),
            )
        })
        .collect();

    let mut targets: IndexMap<String, RepositoryTarget> = IndexMap::new();
    for repository in &settings.repositories {
        let Some(base_url) = parse_http_url(&repository.url) else {
            warn!(id = %repository.id, url = %repository.url, "dropping repository with invalid URL");
            continue;
        };
        targets.insert(
            repository.id.clone(),
            RepositoryTarget {
                id: repository.id.clone(),
                base_url,
                credentials: credentials.get(repository.id.as_str()).cloned(),
            },
        );
    }

    if !targets.contains_key(CENTRAL_ID)
        && let Ok(base_url) = Url::parse(CENTRAL_URL)
    {
        targets.insert(
            CENTRAL_ID.to_string(),
            RepositoryTarget {
                id: CENTRAL_ID.to_string(),
                base_url,
                credentials: credentials.get(CENTRAL_ID).cloned(),
            },
        );
    }

    let mirrors: Vec<_> = settings
        .mirrors
        .iter()
        .filter_map(|mirror| match parse_http_url(&mirror.url) {
            Some(url) => Some((mirror, url)),
            None => {
                warn!(id = %mirror.id, url = %mirror.url, "ignoring mirror with invalid URL");
                None
            }
        })
        .collect();

    for target in targets.values_mut() {
        for (mirror, url) in &mirrors {
            if !mirror.applies_to(&target.id) {
                continue;
            }
            debug!(repository = %target.id, mirror = %mirror.id, url = %url, "applying mirror");
            target.base_url = url.clone();
            if let Some(mirror_credentials) = credentials.get(mirror.id.as_str()) {
                target.credentials = Some(mirror_credentials.clone());
            }
        }
    }

    if let Some(overrides) = overrides {
        for (id, entry) in &overrides.repositories {
            let base_url = parse_override_url(id, &entry.url)?;
            let replaced = targets.contains_key(id);
            if replaced {
                warn!(%id, url = %base_url, "overriding repository from proxy configuration");
            } else {
                info!(%id, url = %base_url, "adding repository from proxy configuration");
            }

            let target = targets.entry(id.clone()).or_insert_with(|| RepositoryTarget {
                id: id.clone(),
                base_url: base_url.clone(),
                credentials: credentials.get(id.as_str()).cloned(),
            });
            target.base_url = base_url;
            if let Some(override_credentials) = entry.credentials() {
                target.credentials = Some(override_credentials);
            }
        }
    }

    Ok(RepositoryTable { targets })
}

fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    (matches!(url.scheme(), "http" | "https") && url.has_host()).then_some(url)
}

fn parse_override_url(id: &str, raw: &str) -> Result<Url, ResolveError> {
    let invalid = |reason: String| ResolveError::InvalidOverride {
        id: id.to_string(),
        reason,
    };

    if id.trim().is_empty() {
        return Err(invalid("repository id must not be blank".to_string()));
    }
    let url = Url::parse(raw.trim()).map_err(|err| invalid(format!("'{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if !url.has_host() {
        return Err(invalid(format!("'{raw}' has no host")));
    }
    Ok(url)
}
