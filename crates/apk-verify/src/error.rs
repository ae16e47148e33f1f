use std::io;
use std::path::{Path, PathBuf};

use schleuder_types::{ChecksumAlgorithm, FingerprintAlgorithm};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("{algorithm} checksum did not match: expected {expected}, got {actual}")]
    ChecksumMismatch {
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },
    #[error("APK signature is invalid: {reason}")]
    SignatureInvalid { reason: String },
    #[error("{algorithm} signature fingerprint did not match: expected {expected}, got {actual}")]
    FingerprintMismatch {
        algorithm: FingerprintAlgorithm,
        expected: String,
        actual: String,
    },
    #[error("no signature fingerprint is pinned and policy does not allow trust on first use")]
    UnpinnedRejected,
    #[error("`{tool}` failed: {reason}")]
    Tool { tool: String, reason: String },
    #[error("I/O error on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl VerificationError {
    pub fn signature_invalid(reason: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            reason: reason.into(),
        }
    }

    pub fn tool(tool: &Path, reason: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
