//! Drives the update cycle and the re-verification sweep.
//!
//! Applications run concurrently, bounded by `settings.concurrency`. Sources
//! of one application run one after another since they share the package
//! path. Only this module's coordinator loop touches the catalog.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use schleuder_types::Version;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{Catalog, CatalogEntry};
use crate::config::{SchleuderConfig, Settings};
use crate::http::HttpClient;
use crate::selector::rank;
use crate::source::{SourceSet, build_sources};
use crate::types::{SchleuderError, SourceError};

/// Result of one cycle for one application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppStatus {
    Updated {
        from: Version,
        to: Version,
        source: String,
    },
    UpToDate {
        version: Version,
    },
    /// No source resolved a version; the catalog entry is untouched.
    NoCandidates,
    /// Every attempted fetch failed.
    Failed {
        attempts: usize,
    },
    Verified {
        version: Version,
    },
    /// Re-verification failed; the file was deleted.
    Evicted {
        reason: String,
    },
    /// No longer configured; entry and file were deleted.
    Removed,
    NoLocalFile,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Updated { from, to, source } => {
                write!(f, "updated from {from} to {to} using {source}")
            }
            AppStatus::UpToDate { version } => write!(f, "up to date ({version})"),
            AppStatus::NoCandidates => f.write_str("no source available"),
            AppStatus::Failed { attempts } => {
                write!(f, "update failed ({attempts} source(s) tried)")
            }
            AppStatus::Verified { version } => write!(f, "verified ({version})"),
            AppStatus::Evicted { reason } => write!(f, "removed after failed verification: {reason}"),
            AppStatus::Removed => f.write_str("no longer configured, removed"),
            AppStatus::NoLocalFile => f.write_str("no local file"),
        }
    }
}

/// Per-application statuses in configuration order, removed apps last.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub apps: IndexMap<String, AppStatus>,
}

impl RunReport {
    pub fn get(&self, app: &str) -> Option<&AppStatus> {
        self.apps.get(app)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AppStatus)> {
        self.apps.iter().map(|(app, status)| (app.as_str(), status))
    }
}

enum UpdateOutcome {
    Updated {
        version: Version,
        source: String,
        file: PathBuf,
    },
    UpToDate(Version),
    NoCandidates,
    Failed(usize),
}

enum SweepOutcome {
    Verified(Version),
    Evicted { file: PathBuf, reason: String },
    NoLocalFile,
}

/// Spawned per-application tasks, keyed back to their application.
struct AppTasks<T> {
    set: JoinSet<T>,
    names: HashMap<Id, String>,
}

impl<T: Send + 'static> AppTasks<T> {
    async fn next(&mut self) -> Option<(String, Option<T>)> {
        match self.set.join_next_with_id().await? {
            Ok((id, value)) => Some((self.names.remove(&id).unwrap_or_default(), Some(value))),
            Err(err) => {
                let app = self.names.remove(&err.id()).unwrap_or_default();
                error!(app = %app, error = %err, "application task failed");
                Some((app, None))
            }
        }
    }
}

pub struct Schleuder {
    settings: Arc<Settings>,
    apps: IndexMap<String, SourceSet>,
}

impl Schleuder {
    pub fn new(settings: Arc<Settings>, apps: IndexMap<String, SourceSet>) -> Self {
        Self { settings, apps }
    }

    /// Build every source of `config`. Fails on the first misconfigured source.
    pub fn from_config(config: SchleuderConfig) -> Result<Self, SchleuderError> {
        let http = HttpClient::new(&config.settings)?;
        let apps = build_sources(&config, &config.settings, &http)?;
        Ok(Self::new(Arc::new(config.settings), apps))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    fn load_catalog(&self) -> Result<Catalog, SchleuderError> {
        Catalog::load_for(self.settings.db_file(), self.app_names())
    }

    /// Current catalog with an entry for every configured application.
    pub fn status(&self) -> Result<Catalog, SchleuderError> {
        self.load_catalog()
    }

    fn spawn_per_app<T, F, Fut>(&self, catalog: &Catalog, work: F) -> AppTasks<T>
    where
        T: Send + 'static,
        F: Fn(String, SourceSet, CatalogEntry) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency()));
        let mut tasks = AppTasks {
            set: JoinSet::new(),
            names: HashMap::new(),
        };
        for (app, sources) in &self.apps {
            let entry = catalog.get(app).cloned().unwrap_or_default();
            let job = work(app.clone(), sources.clone(), entry);
            let semaphore = semaphore.clone();
            let handle = tasks.set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                job.await
            });
            tasks.names.insert(handle.id(), app.clone());
        }
        tasks
    }

    fn in_order(&self, mut statuses: HashMap<String, AppStatus>) -> RunReport {
        let mut report = RunReport::default();
        for app in self.apps.keys() {
            if let Some(status) = statuses.remove(app) {
                report.apps.insert(app.clone(), status);
            }
        }
        report
    }

    /// Fetch newer packages, then drop applications that left the configuration.
    pub async fn update(&self) -> Result<RunReport, SchleuderError> {
        self.settings.create_dirs()?;
        let mut catalog = self.load_catalog()?;
        let mut tasks = self.spawn_per_app(&catalog, |app, sources, entry| async move {
            update_app(&app, &sources, &entry).await
        });

        let mut statuses = HashMap::new();
        while let Some((app, outcome)) = tasks.next().await {
            let from = catalog.get(&app).map(|entry| entry.version.clone()).unwrap_or_default();
            let status = match outcome {
                Some(UpdateOutcome::Updated {
                    version,
                    source,
                    file,
                }) => {
                    catalog.record(&app, version.clone(), &source, file);
                    catalog.save()?;
                    AppStatus::Updated {
                        from,
                        to: version,
                        source,
                    }
                }
                Some(UpdateOutcome::UpToDate(version)) => AppStatus::UpToDate { version },
                Some(UpdateOutcome::NoCandidates) => AppStatus::NoCandidates,
                Some(UpdateOutcome::Failed(attempts)) => AppStatus::Failed { attempts },
                None => AppStatus::Failed { attempts: 0 },
            };
            info!(app = %app, %status, "update finished");
            statuses.insert(app, status);
        }

        let mut report = self.in_order(statuses);
        for (app, entry) in catalog.retain_configured(|app| self.apps.contains_key(app)) {
            if let Some(file) = &entry.file {
                remove_package(&app, file);
            }
            info!(app = %app, "no longer configured, removed");
            report.apps.insert(app, AppStatus::Removed);
        }
        catalog.save()?;
        Ok(report)
    }

    /// Re-verify every catalogued package with the sources offering its version.
    pub async fn verify(&self) -> Result<RunReport, SchleuderError> {
        self.settings.create_dirs()?;
        let mut catalog = self.load_catalog()?;
        let mut tasks = self.spawn_per_app(&catalog, |app, sources, entry| async move {
            verify_app(&app, &sources, &entry).await
        });

        let mut statuses = HashMap::new();
        while let Some((app, outcome)) = tasks.next().await {
            let status = match outcome {
                Some(SweepOutcome::Verified(version)) => AppStatus::Verified { version },
                Some(SweepOutcome::NoLocalFile) => AppStatus::NoLocalFile,
                Some(SweepOutcome::Evicted { file, reason }) => {
                    error!(app = %app, %reason, "integrity could not be verified, removing package");
                    remove_package(&app, &file);
                    catalog.clear(&app);
                    catalog.save()?;
                    AppStatus::Evicted { reason }
                }
                None => AppStatus::Failed { attempts: 0 },
            };
            statuses.insert(app, status);
        }

        catalog.save()?;
        Ok(self.in_order(statuses))
    }
}

#[instrument(skip(sources, entry), fields(local = %entry.version))]
async fn update_app(app: &str, sources: &SourceSet, entry: &CatalogEntry) -> UpdateOutcome {
    let candidates = rank(app, sources).await;
    if candidates.is_empty() {
        warn!("no source resolved a version");
        return UpdateOutcome::NoCandidates;
    }

    let mut attempts = 0;
    for candidate in candidates {
        if entry.has_file() && entry.version >= candidate.version {
            debug!(remote = %candidate.version, "nothing to do");
            return UpdateOutcome::UpToDate(entry.version.clone());
        }

        attempts += 1;
        let source = candidate.source.name().to_string();
        info!(
            from = %entry.version,
            to = %candidate.version,
            source = %source,
            "updating"
        );
        match candidate.source.fetch().await {
            Ok(file) => {
                return UpdateOutcome::Updated {
                    version: candidate.version,
                    source,
                    file,
                };
            }
            Err(err) => warn!(source = %source, error = %err, "fetch failed, trying next source"),
        }
    }
    UpdateOutcome::Failed(attempts)
}

#[instrument(skip(sources, entry), fields(version = %entry.version))]
async fn verify_app(app: &str, sources: &SourceSet, entry: &CatalogEntry) -> SweepOutcome {
    let Some(file) = entry.file.clone() else {
        return SweepOutcome::NoLocalFile;
    };

    let mut checked = 0;
    for source in sources {
        match source.resolve_version().await {
            Ok(version) if version == entry.version => {}
            Ok(version) => {
                debug!(source = source.name(), %version, "source offers another version");
                continue;
            }
            Err(err) => {
                debug!(source = source.name(), error = %err, "source skipped");
                continue;
            }
        }

        match source.verify(&file).await {
            Ok(()) => checked += 1,
            Err(err @ SourceError::Verification(_)) => {
                return SweepOutcome::Evicted {
                    file,
                    reason: format!("{}: {err}", source.name()),
                };
            }
            Err(err) => warn!(source = source.name(), error = %err, "could not re-verify, source skipped"),
        }
    }

    if checked == 0 {
        info!("no source could vouch for the catalogued version, nothing to compare");
    }
    SweepOutcome::Verified(entry.version.clone())
}

fn remove_package(app: &str, file: &Path) {
    match fs::remove_file(file) {
        Ok(()) => debug!(app, file = %file.display(), "package removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => error!(app, file = %file.display(), error = %err, "could not remove package"),
    }
}
