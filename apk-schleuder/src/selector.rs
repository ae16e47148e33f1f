use std::sync::Arc;

use schleuder_types::Version;
use tracing::{debug, warn};

use crate::source::PackageSource;

/// A source whose version resolved, ready to be tried.
#[derive(Clone)]
pub struct Candidate {
    pub version: Version,
    pub priority: i64,
    pub source: Arc<dyn PackageSource>,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("source", &self.source.name())
            .field("version", &self.version)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Rank the sources of `app`, best first: newest version, then highest priority.
///
/// Sources whose version cannot be resolved are logged and left out. Equal
/// candidates keep their configuration order.
pub async fn rank(app: &str, sources: &[Arc<dyn PackageSource>]) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(sources.len());
    for source in sources {
        match source.resolve_version().await {
            Ok(version) => {
                debug!(app, source = source.name(), %version, "version resolved");
                candidates.push(Candidate {
                    version,
                    priority: source.priority(),
                    source: source.clone(),
                });
            }
            Err(err) => {
                warn!(app, source = source.name(), error = %err, "excluding source from ranking");
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| b.priority.cmp(&a.priority))
    });
    candidates
}
