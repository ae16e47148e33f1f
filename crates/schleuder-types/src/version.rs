use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,
    #[error("numeric version component `{0}` is out of range")]
    Overflow(String),
}

/// Text sorts below numbers, so `1.0rc1 < 1.0`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Component {
    Text(String),
    Number(u64),
}

static ABSENT: Component = Component::Number(0);

/// Loosely parsed dotted version such as `4.2.1`, `v3.11-release` or `1.0rc2`.
///
/// Components are compared pairwise. Numeric components compare as numbers,
/// textual ones lexicographically, and a missing trailing component counts as
/// zero. Two versions are equal when they compare equal, so `1.0 == 1.0.0`.
#[derive(Clone, Debug)]
pub struct Version {
    raw: String,
    parts: Vec<Component>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        let mut parts = Vec::new();

        let chunks = raw.split(|c: char| matches!(c, '.' | '-' | '_' | '+') || c.is_whitespace());
        for chunk in chunks {
            let mut rest = chunk;
            while let Some(first) = rest.chars().next() {
                let numeric = first.is_ascii_digit();
                let end = rest
                    .find(|c: char| c.is_ascii_digit() != numeric)
                    .unwrap_or(rest.len());
                let (token, tail) = rest.split_at(end);
                let part = if numeric {
                    let value = token
                        .parse()
                        .map_err(|_| VersionError::Overflow(token.to_string()))?;
                    Component::Number(value)
                } else {
                    Component::Text(token.to_lowercase())
                };
                parts.push(part);
                rest = tail;
            }
        }

        if parts.is_empty() {
            return Err(VersionError::Empty);
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// The version recorded for applications that have never been fetched.
    pub fn zero() -> Self {
        Self {
            raw: "0.0.0".to_string(),
            parts: vec![Component::Number(0); 3],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::zero()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for idx in 0..len {
            let left = self.parts.get(idx).unwrap_or(&ABSENT);
            let right = other.parts.get(idx).unwrap_or(&ABSENT);
            match left.cmp(right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Normalize a version string scraped from a download page or release tag.
pub fn clean_version(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .trim_start_matches('v')
        .replace("-release", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(input: &str) -> Version {
        Version::parse(input).expect("version")
    }

    #[test]
    fn compares_components_numerically() {
        assert!(v("1.10.0") > v("1.2.0"));
        assert!(v("2.0") > v("1.99.99"));
    }

    #[test]
    fn missing_components_count_as_zero() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0.1") > v("1"));
    }

    #[test]
    fn text_components_sort_below_numbers() {
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0rc1") < v("1.0.0"));
        assert!(v("1.0rc2") > v("1.0rc1"));
        assert!(v("1.0beta") < v("1.0rc"));
    }

    #[test]
    fn keeps_original_text_for_display() {
        assert_eq!(v(" 3.11-beta ").to_string(), "3.11-beta");
        assert_eq!(Version::zero().to_string(), "0.0.0");
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(Version::parse("  "), Err(VersionError::Empty));
        assert_eq!(Version::parse("..-"), Err(VersionError::Empty));
    }

    #[test]
    fn rejects_oversized_numbers() {
        assert!(matches!(
            Version::parse("1.99999999999999999999999"),
            Err(VersionError::Overflow(_))
        ));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&v("4.2.1")).unwrap();
        assert_eq!(json, "\"4.2.1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("4.2.1"));
        assert!(serde_json::from_str::<Version>("\"\"").is_err());
    }

    #[test]
    fn cleans_scraped_versions() {
        assert_eq!(clean_version("v3.2.1"), "3.2.1");
        assert_eq!(clean_version("V4.12.0-release\n"), "4.12.0");
        assert_eq!(clean_version("2.0"), "2.0");
    }
}
