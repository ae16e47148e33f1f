//! Value types shared between the verification engine and the updater.

pub mod algorithm;
pub mod version;

pub use algorithm::{ChecksumAlgorithm, FingerprintAlgorithm, UnknownAlgorithm};
pub use version::{Version, VersionError, clean_version};
