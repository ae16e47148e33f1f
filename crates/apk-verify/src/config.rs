use std::path::PathBuf;

use schleuder_types::{ChecksumAlgorithm, FingerprintAlgorithm};

/// External programs the engine shells out to.
#[derive(Clone, Debug)]
pub struct ToolPaths {
    pub keytool: PathBuf,
    pub jarsigner: PathBuf,
    /// Parent for per-operation scratch directories. System temp dir if unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            keytool: PathBuf::from("keytool"),
            jarsigner: PathBuf::from("jarsigner"),
            temp_dir: None,
        }
    }
}

/// Policy describing how packages must be verified before they are accepted.
#[derive(Clone, Debug)]
pub struct VerifyPolicy {
    pub tools: ToolPaths,
    /// Whether a source without any pinned fingerprint is trusted on first use.
    pub allow_unpinned: bool,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            allow_unpinned: true,
        }
    }
}

/// Expected values for one package, already resolved to hex strings.
///
/// The same algorithm may appear several times; every value must match.
#[derive(Clone, Debug, Default)]
pub struct Expectations {
    pub checksums: Vec<(ChecksumAlgorithm, String)>,
    pub fingerprints: Vec<(FingerprintAlgorithm, String)>,
}

impl Expectations {
    pub fn is_pinned(&self) -> bool {
        !self.fingerprints.is_empty()
    }
}
