use std::{
    fs::File,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use memmap2::Mmap;
use tokio::fs;

/// Read-only view of a local Maven repository (usually `~/.m2/repository`).
///
/// Lookups are recomputed against the filesystem every time, so there is
/// nothing to invalidate. Every resolved path stays below `root`.
#[derive(Debug, Clone)]
pub struct LocalArtifactCache {
    root: PathBuf,
}

impl LocalArtifactCache {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.is_dir() {
            bail!("Not a valid directory '{}'", root.display());
        }
        Ok(LocalArtifactCache { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the regular file backing `relative`, if the repository has it.
    pub async fn find(&self, relative: &str) -> Option<PathBuf> {
        let relative = relative.trim_start_matches('/');
        if relative.trim().is_empty() {
            return None;
        }

        let sanitized = sanitize(Path::new(relative));
        if sanitized.as_os_str().is_empty() {
            return None;
        }

        let candidate = self.root.join(sanitized);
        match fs::metadata(&candidate).await {
            Ok(metadata) if metadata.is_file() => Some(candidate),
            _ => None,
        }
    }
}

/// Normalizes `.`/`..` segments and strips anything that would anchor the
/// result outside of the repository root (root dirs, prefixes, leading `..`).
pub fn sanitize(path: &Path) -> PathBuf {
    let cleaned = path_clean::clean(path);
    let normalized: PathBuf = cleaned
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if normalized.as_path() != path {
        tracing::warn!(
            input = %path.display(),
            normalized = %normalized.display(),
            "normalized local repository path"
        );
    }
    normalized
}

/// A local artifact mapped read-only into memory.
pub struct MappedArtifact {
    path: PathBuf,
    bytes: Bytes,
}

impl MappedArtifact {
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || map_file(path))
            .await
            .context("joining artifact mapping task")?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hands out the mapping; the file stays mapped until every clone is dropped.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

fn map_file(path: PathBuf) -> Result<MappedArtifact> {
    let file =
        File::open(&path).with_context(|| format!("opening local artifact {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("reading metadata {}", path.display()))?
        .len();

    if len == 0 {
        return Ok(MappedArtifact {
            path,
            bytes: Bytes::new(),
        });
    }

    // SAFETY: the mapping is read-only and this process never writes into the
    // local repository.
    let map = unsafe { Mmap::map(&file) }
        .with_context(|| format!("mapping local artifact {}", path.display()))?;

    Ok(MappedArtifact {
        path,
        bytes: Bytes::from_owner(map),
    })
}
