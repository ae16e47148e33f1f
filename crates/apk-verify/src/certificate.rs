use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use schleuder_types::FingerprintAlgorithm;
use tempfile::TempDir;
use zip::ZipArchive;

use crate::config::ToolPaths;
use crate::error::VerificationError;

static CERT_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^META-INF/[^/]*\.(RSA|DSA|EC)$").expect("valid certificate entry pattern")
});

// Matched against keytool output with all whitespace removed and lowercased.
static KEYTOOL_FINGERPRINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"certificatefingerprints:",
        r"(?:md5(?P<md5>(?::[0-9a-f]{2}){16}))?",
        r"sha1(?P<sha1>(?::[0-9a-f]{2}){20})",
        r"sha256(?P<sha256>(?::[0-9a-f]{2}){32})",
    ))
    .expect("valid keytool fingerprint pattern")
});

/// Fingerprints of a package's signing certificate as bare lowercase hex.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fingerprints {
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

impl Fingerprints {
    pub fn get(&self, algorithm: FingerprintAlgorithm) -> Option<&str> {
        match algorithm {
            FingerprintAlgorithm::Md5 => self.md5.as_deref(),
            FingerprintAlgorithm::Sha1 => self.sha1.as_deref(),
            FingerprintAlgorithm::Sha256 => self.sha256.as_deref(),
        }
    }
}

/// Strip separators and whitespace and lowercase, so `AB:CD` equals `abcd`.
pub fn normalize_fingerprint(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Parse the `Certificate fingerprints:` block printed by `keytool -printcert`.
pub fn parse_keytool_output(output: &str) -> Option<Fingerprints> {
    let squashed = output
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let captures = KEYTOOL_FINGERPRINTS.captures(&squashed)?;
    let group = |name: &str| captures.name(name).map(|m| m.as_str().replace(':', ""));

    Some(Fingerprints {
        md5: group("md5"),
        sha1: group("sha1"),
        sha256: group("sha256"),
    })
}

/// Copy the signature block (`META-INF/*.RSA|DSA|EC`) of `apk` into `dir`.
pub fn extract_certificate(apk: &Path, dir: &Path) -> Result<PathBuf, VerificationError> {
    let file = File::open(apk).map_err(|err| VerificationError::io(apk, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| {
        VerificationError::signature_invalid(format!("package is not a readable archive: {err}"))
    })?;

    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx).map_err(|err| {
            VerificationError::signature_invalid(format!("corrupt archive entry: {err}"))
        })?;
        if !CERT_ENTRY.is_match(entry.name()) {
            continue;
        }

        let file_name = Path::new(entry.name())
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("CERT"));
        let target = dir.join(file_name);
        let mut out = File::create(&target).map_err(|err| VerificationError::io(&target, err))?;
        io::copy(&mut entry, &mut out).map_err(|err| VerificationError::io(&target, err))?;
        return Ok(target);
    }

    Err(VerificationError::signature_invalid(
        "no certificate found in APK, is it signed?",
    ))
}

fn scratch_dir(tools: &ToolPaths) -> Result<TempDir, VerificationError> {
    match &tools.temp_dir {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(|err| VerificationError::io(parent, err))?;
            tempfile::Builder::new()
                .prefix("apk-cert-")
                .tempdir_in(parent)
                .map_err(|err| VerificationError::io(parent, err))
        }
        None => tempfile::Builder::new()
            .prefix("apk-cert-")
            .tempdir()
            .map_err(|err| VerificationError::io(&std::env::temp_dir(), err)),
    }
}

/// Extract the signing certificate of `apk` and read its fingerprints with `keytool`.
///
/// The certificate lives in a scratch directory that is removed on return, so
/// concurrent calls never share extraction paths.
pub fn read_fingerprints(apk: &Path, tools: &ToolPaths) -> Result<Fingerprints, VerificationError> {
    let scratch = scratch_dir(tools)?;
    let cert = extract_certificate(apk, scratch.path())?;

    let output = Command::new(&tools.keytool)
        .arg("-printcert")
        .arg("-file")
        .arg(&cert)
        .output()
        .map_err(|err| VerificationError::tool(&tools.keytool, format!("could not run: {err}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VerificationError::tool(
            &tools.keytool,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    parse_keytool_output(&stdout).ok_or_else(|| {
        VerificationError::tool(&tools.keytool, "no certificate fingerprints in output")
    })
}

/// Compare the actual fingerprint for `algorithm` against `expected`.
pub fn verify_fingerprint(
    actual: &Fingerprints,
    algorithm: FingerprintAlgorithm,
    expected: &str,
) -> Result<(), VerificationError> {
    let expected = normalize_fingerprint(expected);
    match actual.get(algorithm) {
        Some(value) if value == expected => Ok(()),
        Some(value) => Err(VerificationError::FingerprintMismatch {
            algorithm,
            expected,
            actual: value.to_string(),
        }),
        None => Err(VerificationError::FingerprintMismatch {
            algorithm,
            expected,
            actual: "<not reported by keytool>".to_string(),
        }),
    }
}
