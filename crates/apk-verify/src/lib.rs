//! Verification engine for downloaded Android packages.
//!
//! Packages are checked in three independent stages: content checksums, the
//! archive signature (`jarsigner`), and the fingerprints of the embedded
//! signing certificate (`keytool`) against pinned or derived values.

mod certificate;
mod checksum;
mod config;
mod error;
mod signature;
mod verify;

pub use certificate::{
    Fingerprints, extract_certificate, normalize_fingerprint, parse_keytool_output,
    read_fingerprints, verify_fingerprint,
};
pub use checksum::{file_digest, verify_checksum};
pub use config::{Expectations, ToolPaths, VerifyPolicy};
pub use error::VerificationError;
pub use signature::verify_signature;
pub use verify::{Check, CheckOutcome, Verification, VerifiedPackage, verify};
