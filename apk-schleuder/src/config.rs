use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use apk_verify::{ToolPaths, VerifyPolicy};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::SchleuderError;

/// Process-wide settings, built once at startup and shared by reference.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Settings {
    /// Directory holding `<app>.apk` files, i.e. the F-Droid `repo/` directory.
    pub repo_dir: PathBuf,
    #[serde(default)]
    pub db_file: Option<PathBuf>,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_keytool")]
    pub keytool: PathBuf,
    #[serde(default = "default_jarsigner")]
    pub jarsigner: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_allow_unpinned")]
    pub allow_unpinned: bool,
}

fn default_keytool() -> PathBuf {
    PathBuf::from("keytool")
}

fn default_jarsigner() -> PathBuf {
    PathBuf::from("jarsigner")
}

fn default_concurrency() -> usize {
    4
}

fn default_http_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_allow_unpinned() -> bool {
    true
}

impl Settings {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            db_file: None,
            temp_dir: None,
            keytool: default_keytool(),
            jarsigner: default_jarsigner(),
            concurrency: default_concurrency(),
            http_timeout_secs: default_http_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: None,
            allow_unpinned: default_allow_unpinned(),
        }
    }

    /// Location of the persisted catalog.
    pub fn db_file(&self) -> PathBuf {
        self.db_file
            .clone()
            .unwrap_or_else(|| self.repo_dir.join("db.json"))
    }

    /// Download target for `app`; shared by all of the app's sources.
    pub fn package_path(&self, app: &str) -> PathBuf {
        self.repo_dir.join(format!("{app}.apk"))
    }

    /// Create the repository directory and the catalog's parent.
    pub fn create_dirs(&self) -> Result<(), SchleuderError> {
        let db_file = self.db_file();
        let dirs = [Some(self.repo_dir.as_path()), db_file.parent()];
        for dir in dirs.into_iter().flatten().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| SchleuderError::catalog(dir, "created", err))?;
        }
        Ok(())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("apk-schleuder/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            tools: ToolPaths {
                keytool: self.keytool.clone(),
                jarsigner: self.jarsigner.clone(),
                temp_dir: self.temp_dir.clone(),
            },
            allow_unpinned: self.allow_unpinned,
        }
    }
}

/// Configuration file structure.
///
/// Sources stay as raw values here; they are validated one by one when the
/// sources are built so errors can name the offending app and source.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchleuderConfig {
    pub settings: Settings,
    #[serde(default)]
    pub apps: IndexMap<String, IndexMap<String, Value>>,
}

/// Load a [`SchleuderConfig`] from JSON or YAML.
pub fn load_config(path: &Path) -> Result<SchleuderConfig, SchleuderError> {
    let content = fs::read_to_string(path)?;
    parse_config(path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<SchleuderConfig, SchleuderError> {
    if is_json(path, content) {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml_bw::from_str(content)?)
    }
}

fn is_json(path: &Path, content: &str) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if matches!(ext, "json") {
            return true;
        }
        if matches!(ext, "yaml" | "yml") {
            return false;
        }
    }

    content
        .chars()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| c == '{')
}
