//! Reader for Maven's `settings.xml`.
//!
//! Only the pieces the proxy needs are extracted: server credentials,
//! repository declarations and mirrors. Entries are collected wherever they
//! appear below `<settings>` (for example inside `<profiles>`), in document
//! order.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use quick_xml::{Reader, events::Event};
use tracing::{info, trace, warn};

#[derive(Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"******")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsRepository {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub id: String,
    /// Comma-separated `mirrorOf` tokens: literal ids, `*`, or `!id` exclusions
    pub mirror_of: String,
    pub url: String,
}

impl Mirror {
    /// Whether this mirror redirects the repository `id`.
    pub fn applies_to(&self, id: &str) -> bool {
        let tokens: Vec<&str> = self.mirror_of.split(',').map(str::trim).collect();
        let excluded = format!("!{id}");
        tokens.contains(&id) || (tokens.contains(&"*") && !tokens.contains(&excluded.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MavenSettings {
    pub servers: Vec<ServerCredentials>,
    pub repositories: Vec<SettingsRepository>,
    pub mirrors: Vec<Mirror>,
}

impl MavenSettings {
    /// Reads `path`; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            info!(path = %path.display(), "no Maven settings found");
            return Ok(None);
        }

        info!(path = %path.display(), "reading Maven settings");
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read Maven settings {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("invalid Maven settings {}", path.display()))
            .map(Some)
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut collector = SettingsCollector::default();
        let mut depth = 0usize;

        loop {
            let event = reader.read_event().map_err(|err| {
                anyhow!(
                    "malformed XML at position {}: {err}",
                    reader.buffer_position()
                )
            })?;

            match event {
                Event::Start(element) => {
                    depth += 1;
                    collector.on_start(&String::from_utf8_lossy(element.local_name().as_ref()), depth);
                }
                Event::Empty(element) => {
                    collector.on_start(
                        &String::from_utf8_lossy(element.local_name().as_ref()),
                        depth + 1,
                    );
                    collector.on_end(depth + 1);
                }
                Event::Text(text) => {
                    let text = text.unescape().context("decoding element text")?;
                    collector.on_text(&text, depth);
                }
                Event::CData(data) => {
                    collector.on_text(&String::from_utf8_lossy(&data), depth);
                }
                Event::End(_) => {
                    collector.on_end(depth);
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }

            if collector.done {
                break;
            }
        }

        if !collector.found_settings {
            warn!("abnormal finish: no <settings> element found in Maven settings");
        }
        Ok(collector.settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Server,
    Repository,
    Mirror,
}

impl EntryKind {
    fn from_element(name: &str) -> Option<Self> {
        match name {
            "server" => Some(Self::Server),
            "repository" => Some(Self::Repository),
            "mirror" => Some(Self::Mirror),
            _ => None,
        }
    }
}

struct PendingEntry {
    kind: EntryKind,
    depth: usize,
    fields: HashMap<String, String>,
    field: Option<String>,
}

#[derive(Default)]
struct SettingsCollector {
    settings: MavenSettings,
    settings_depth: Option<usize>,
    found_settings: bool,
    done: bool,
    pending: Option<PendingEntry>,
}

impl SettingsCollector {
    fn on_start(&mut self, name: &str, depth: usize) {
        if self.settings_depth.is_none() {
            if name == "settings" {
                self.settings_depth = Some(depth);
                self.found_settings = true;
            }
            return;
        }

        match self.pending.as_mut() {
            None => {
                if let Some(kind) = EntryKind::from_element(name) {
                    self.pending = Some(PendingEntry {
                        kind,
                        depth,
                        fields: HashMap::new(),
                        field: None,
                    });
                }
            }
            Some(entry) if depth == entry.depth + 1 => {
                entry.fields.entry(name.to_string()).or_default();
                entry.field = Some(name.to_string());
            }
            Some(_) => {}
        }
    }

    fn on_text(&mut self, text: &str, depth: usize) {
        if let Some(entry) = self.pending.as_mut()
            && depth == entry.depth + 1
            && let Some(field) = &entry.field
            && let Some(value) = entry.fields.get_mut(field)
        {
            value.push_str(text);
        }
    }

    fn on_end(&mut self, depth: usize) {
        if let Some(entry) = self.pending.as_mut() {
            if depth == entry.depth + 1 {
                entry.field = None;
                return;
            }
            if depth == entry.depth
                && let Some(entry) = self.pending.take()
            {
                self.finish(entry);
                return;
            }
        }

        if self.settings_depth == Some(depth) {
            self.done = true;
        }
    }

    fn finish(&mut self, entry: PendingEntry) {
        let PendingEntry {
            kind, mut fields, ..
        } = entry;
        let id = fields.remove("id").filter(|id| !id.trim().is_empty());

        match kind {
            EntryKind::Server => {
                match (id, fields.remove("username"), fields.remove("password")) {
                    (Some(id), Some(username), Some(password)) => {
                        trace!(%id, %username, "found server credentials");
                        self.settings.servers.push(ServerCredentials {
                            id,
                            username,
                            password,
                        });
                    }
                    (id, username, _) => {
                        trace!(?id, ?username, "ignoring incomplete server credentials");
                    }
                }
            }
            EntryKind::Repository => match (id, fields.remove("url")) {
                (Some(id), Some(url)) => {
                    trace!(%id, %url, "found repository");
                    self.settings.repositories.push(SettingsRepository { id, url });
                }
                (id, url) => trace!(?id, ?url, "ignoring incomplete repository"),
            },
            EntryKind::Mirror => {
                match (id, fields.remove("mirrorOf"), fields.remove("url")) {
                    (Some(id), Some(mirror_of), Some(url)) => {
                        trace!(%id, %mirror_of, %url, "found mirror");
                        self.settings.mirrors.push(Mirror { id, mirror_of, url });
                    }
                    (id, mirror_of, url) => {
                        trace!(?id, ?mirror_of, ?url, "ignoring incomplete mirror");
                    }
                }
            }
        }
    }
}
