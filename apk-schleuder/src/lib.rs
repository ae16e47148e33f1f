//! Fetch Android packages from untrusted third-party sites, verify them and
//! keep a catalog of the last known-good package per application.

pub mod catalog;
pub mod config;
pub mod http;
pub mod orchestrator;
pub mod retry;
pub mod selector;
pub mod source;
pub mod types;

pub use catalog::{Catalog, CatalogEntry};
pub use config::{SchleuderConfig, Settings, load_config};
pub use orchestrator::{AppStatus, RunReport, Schleuder};
pub use selector::{Candidate, rank};
pub use source::{PackageSource, Source, SourceSet, build_sources};
pub use types::{ConfigurationError, SchleuderError, SourceError};

pub use schleuder_types::{Version, clean_version};
