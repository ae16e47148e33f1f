use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::Md5;
use schleuder_types::ChecksumAlgorithm;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::VerificationError;

/// Lowercase hex digest of the file at `path`.
pub fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_reader::<Md5>(&mut file),
        ChecksumAlgorithm::Sha1 => digest_reader::<Sha1>(&mut file),
        ChecksumAlgorithm::Sha224 => digest_reader::<Sha224>(&mut file),
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256>(&mut file),
        ChecksumAlgorithm::Sha384 => digest_reader::<Sha384>(&mut file),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512>(&mut file),
    }
}

fn digest_reader<D: Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute the digest of `path` and compare it against `expected`.
///
/// Returns the actual digest on success.
pub fn verify_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    expected: &str,
) -> Result<String, VerificationError> {
    let actual = file_digest(path, algorithm).map_err(|err| VerificationError::io(path, err))?;
    let expected = expected.trim().to_ascii_lowercase();
    if actual != expected {
        return Err(VerificationError::ChecksumMismatch {
            algorithm,
            expected,
            actual,
        });
    }
    Ok(actual)
}
