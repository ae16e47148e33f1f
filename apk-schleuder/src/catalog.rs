//! Persisted record of the last known-good package per application.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use schleuder_types::Version;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::types::SchleuderError;

/// Catalog record of one application. Fields are kept in key order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CatalogEntry {
    /// Package on disk, `None` when there is no local file.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Name of the source that supplied `file`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_version")]
    pub version: Version,
}

impl CatalogEntry {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// Unparseable versions fall back to zero so the entry is refreshed.
fn lenient_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let text = match raw {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        _ => return Ok(Version::zero()),
    };
    Ok(Version::parse(&text).unwrap_or_default())
}

#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Read the catalog at `path`.
    ///
    /// A missing or malformed file yields an empty catalog. Entries pointing
    /// at files that no longer exist lose their `file`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SchleuderError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(content) => match serde_json::from_slice(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "catalog is malformed, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(SchleuderError::catalog(&path, "read", err)),
        };

        let mut catalog = Self { path, entries };
        catalog.heal();
        Ok(catalog)
    }

    /// Load and create default entries for every configured application.
    pub fn load_for<'a>(
        path: impl Into<PathBuf>,
        apps: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, SchleuderError> {
        let mut catalog = Self::load(path)?;
        for app in apps {
            catalog.ensure(app);
        }
        Ok(catalog)
    }

    fn heal(&mut self) {
        for (app, entry) in &mut self.entries {
            if entry.file.as_deref().is_some_and(|file| !file.is_file()) {
                debug!(app = %app, file = ?entry.file, "catalogued file is gone");
                entry.file = None;
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, app: &str) -> Option<&CatalogEntry> {
        self.entries.get(app)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(app, entry)| (app.as_str(), entry))
    }

    pub fn ensure(&mut self, app: &str) -> &mut CatalogEntry {
        self.entries.entry(app.to_string()).or_default()
    }

    /// Record a verified package.
    pub fn record(&mut self, app: &str, version: Version, source: &str, file: PathBuf) {
        let entry = self.ensure(app);
        entry.version = version;
        entry.source = Some(source.to_string());
        entry.file = Some(file);
    }

    /// Reset `app` to "no local file".
    pub fn clear(&mut self, app: &str) {
        *self.ensure(app) = CatalogEntry::default();
    }

    pub fn remove(&mut self, app: &str) -> Option<CatalogEntry> {
        self.entries.remove(app)
    }

    /// Drop entries of applications for which `configured` is false.
    pub fn retain_configured(
        &mut self,
        configured: impl Fn(&str) -> bool,
    ) -> Vec<(String, CatalogEntry)> {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|app| !configured(app))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|app| self.entries.remove(&app).map(|entry| (app, entry)))
            .collect()
    }

    /// Write the catalog through a temporary file in the same directory.
    pub fn save(&self) -> Result<(), SchleuderError> {
        let write = || -> io::Result<()> {
            let dir = self
                .path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut tmp = NamedTempFile::new_in(dir)?;
            serde_json::to_writer_pretty(&mut tmp, &self.entries)?;
            tmp.write_all(b"\n")?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|err| err.error)?;
            Ok(())
        };
        write().map_err(|err| SchleuderError::catalog(&self.path, "written", err))
    }
}
