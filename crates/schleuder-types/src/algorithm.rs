use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unrecognized {kind} algorithm `{name}`, recognized are {expected}")]
pub struct UnknownAlgorithm {
    pub kind: &'static str,
    pub name: String,
    pub expected: String,
}

fn normalized(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_'))
        .collect::<String>()
        .to_ascii_lowercase()
}

fn known_names<T: fmt::Display>(all: &[T]) -> String {
    all.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Digest used to check the downloaded package bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 6] = [
        Self::Md5,
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha224 => "SHA224",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    /// Number of hex characters in a digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha224 => 56,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalized(s);
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| UnknownAlgorithm {
                kind: "hashing",
                name: s.to_string(),
                expected: known_names(&Self::ALL),
            })
    }
}

/// Digest of the package's signing certificate, as printed by `keytool`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FingerprintAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl FingerprintAlgorithm {
    pub const ALL: [FingerprintAlgorithm; 3] = [Self::Sha256, Self::Sha1, Self::Md5];

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Number of hex characters in a bare fingerprint.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FingerprintAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalized(s);
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| UnknownAlgorithm {
                kind: "signature fingerprint",
                name: s.to_string(),
                expected: known_names(&Self::ALL),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_loosely() {
        assert_eq!("SHA256".parse(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("sha-512".parse(), Ok(ChecksumAlgorithm::Sha512));
        assert_eq!(" md5 ".parse(), Ok(FingerprintAlgorithm::Md5));
        assert_eq!("Sha_1".parse(), Ok(FingerprintAlgorithm::Sha1));
    }

    #[test]
    fn digest_lengths() {
        let lengths: Vec<_> = ChecksumAlgorithm::ALL.iter().map(|alg| alg.hex_len()).collect();
        assert_eq!(lengths, vec![32, 40, 56, 64, 96, 128]);
        assert_eq!(FingerprintAlgorithm::Sha1.hex_len(), ChecksumAlgorithm::Sha1.hex_len());
    }

    #[test]
    fn unknown_names_list_alternatives() {
        let err = "sha3".parse::<FingerprintAlgorithm>().unwrap_err();
        assert_eq!(err.name, "sha3");
        assert_eq!(err.expected, "SHA256, SHA1, MD5");
        assert!("SHA224".parse::<FingerprintAlgorithm>().is_err());
        assert!("blake3".parse::<ChecksumAlgorithm>().is_err());
    }
}
