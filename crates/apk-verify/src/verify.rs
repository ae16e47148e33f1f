use std::fmt;
use std::path::{Path, PathBuf};

use schleuder_types::{ChecksumAlgorithm, FingerprintAlgorithm};
use tracing::{info, warn};

use crate::certificate::{self, Fingerprints};
use crate::checksum;
use crate::config::{Expectations, VerifyPolicy};
use crate::error::VerificationError;
use crate::signature;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Check {
    Checksum(ChecksumAlgorithm),
    Signature,
    Fingerprint(FingerprintAlgorithm),
    /// Reading the certificate fingerprints, or the decision to trust without any.
    Trust,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Checksum(alg) => write!(f, "{alg} checksum"),
            Check::Signature => f.write_str("APK signature"),
            Check::Fingerprint(alg) => write!(f, "{alg} signature fingerprint"),
            Check::Trust => f.write_str("signing identity"),
        }
    }
}

#[derive(Debug)]
pub struct CheckOutcome {
    pub check: Check,
    pub result: Result<(), VerificationError>,
}

/// Result of every check run against one package file.
#[derive(Debug)]
pub struct Verification {
    pub path: PathBuf,
    pub outcomes: Vec<CheckOutcome>,
    pub fingerprints: Option<Fingerprints>,
    pub pinned: bool,
}

/// A package that passed every configured check.
#[derive(Clone, Debug)]
pub struct VerifiedPackage {
    pub path: PathBuf,
    pub fingerprints: Option<Fingerprints>,
    pub pinned: bool,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Check, &VerificationError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (&outcome.check, err)))
    }

    /// Collapse the report into the first failure, if any.
    pub fn into_result(self) -> Result<VerifiedPackage, VerificationError> {
        let Verification {
            path,
            outcomes,
            fingerprints,
            pinned,
        } = self;
        if let Some(err) = outcomes.into_iter().find_map(|outcome| outcome.result.err()) {
            return Err(err);
        }
        Ok(VerifiedPackage {
            path,
            fingerprints,
            pinned,
        })
    }
}

/// Run the full verification chain against `apk`.
///
/// Checksums, the archive signature and the certificate fingerprints are all
/// evaluated even when an earlier stage fails, so the report shows every
/// problem at once.
pub fn verify(apk: &Path, expected: &Expectations, policy: &VerifyPolicy) -> Verification {
    let mut outcomes = Vec::new();

    for (algorithm, value) in &expected.checksums {
        let result = checksum::verify_checksum(apk, *algorithm, value).map(|_| ());
        outcomes.push(record(Check::Checksum(*algorithm), result));
    }

    let result = signature::verify_signature(apk, &policy.tools);
    outcomes.push(record(Check::Signature, result));

    let mut fingerprints = None;
    if expected.is_pinned() {
        match certificate::read_fingerprints(apk, &policy.tools) {
            Ok(actual) => {
                for (algorithm, value) in &expected.fingerprints {
                    let result = certificate::verify_fingerprint(&actual, *algorithm, value);
                    outcomes.push(record(Check::Fingerprint(*algorithm), result));
                }
                fingerprints = Some(actual);
            }
            Err(err) => outcomes.push(record(Check::Trust, Err(err))),
        }
    } else if policy.allow_unpinned {
        warn!(
            path = %apk.display(),
            "no signature fingerprint configured, trusting signer on first use"
        );
    } else {
        outcomes.push(record(Check::Trust, Err(VerificationError::UnpinnedRejected)));
    }

    Verification {
        path: apk.to_path_buf(),
        outcomes,
        fingerprints,
        pinned: expected.is_pinned(),
    }
}

fn record(check: Check, result: Result<(), VerificationError>) -> CheckOutcome {
    match &result {
        Ok(()) => info!("{check} matches"),
        Err(err) => warn!(error = %err, "{check} failed"),
    }
    CheckOutcome { check, result }
}
