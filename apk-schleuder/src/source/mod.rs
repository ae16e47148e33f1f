//! Source adapters: one per (application, distribution site) pair.
//!
//! Every site variant exposes the same [`PackageSource`] contract. Network
//! results are memoized per adapter instance, failures included, so a source
//! is queried at most once per run.

mod expected;
mod github;
mod mirror;
mod web;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use apk_verify::{Expectations, VerifyPolicy, normalize_fingerprint};
use async_trait::async_trait;
use indexmap::IndexMap;
use schleuder_types::{ChecksumAlgorithm, FingerprintAlgorithm, Version, clean_version};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::task::JoinError;
use tracing::{Span, instrument};

pub use expected::{Documents, Expected, Extractor, ExtractorConfig, ValueConfig};
pub use github::GithubSource;
pub use mirror::{MirrorSite, MirrorSource};
pub use web::WebSource;

use crate::config::{SchleuderConfig, Settings};
use crate::http::HttpClient;
use crate::types::{ConfigurationError, SourceError};

/// Uniform contract every source adapter fulfils.
#[async_trait]
pub trait PackageSource: Send + Sync {
    fn name(&self) -> &str;

    /// Higher wins between candidates of equal version.
    fn priority(&self) -> i64;

    /// Latest version offered. Resolved at most once per instance.
    async fn resolve_version(&self) -> Result<Version, SourceError>;

    /// Package URL. Resolved at most once per instance.
    async fn resolve_download_url(&self) -> Result<String, SourceError>;

    /// Download and verify the package; returns the application's package path.
    ///
    /// On error the previous file at that path is left untouched.
    async fn fetch(&self) -> Result<PathBuf, SourceError>;

    /// Re-verify an already downloaded package.
    async fn verify(&self, path: &Path) -> Result<(), SourceError>;
}

/// Adapters of one application, in configuration order.
pub type SourceSet = Vec<Arc<dyn PackageSource>>;

/// Closed set of site variants.
#[derive(Debug)]
pub enum SourceKind {
    Web(WebSource),
    Github(GithubSource),
    Mirror(MirrorSource),
}

impl SourceKind {
    /// Document derived checksums and fingerprints are evaluated against.
    fn metadata_url(&self) -> &str {
        match self {
            SourceKind::Web(web) => web.page_url(),
            SourceKind::Github(github) => github.api_url(),
            SourceKind::Mirror(mirror) => mirror.download_page(),
        }
    }

    async fn version(&self, docs: &Documents) -> Result<String, SourceError> {
        match self {
            SourceKind::Web(web) => web.version(docs).await,
            SourceKind::Github(github) => github.version(docs).await,
            SourceKind::Mirror(mirror) => mirror.version(docs).await,
        }
    }

    async fn download_url(&self, docs: &Documents, version: &str) -> Result<String, SourceError> {
        match self {
            SourceKind::Web(web) => web.download_url(docs, version).await,
            SourceKind::Github(github) => github.download_url(docs).await,
            SourceKind::Mirror(mirror) => mirror.download_url(docs).await,
        }
    }
}

/// A configured source of one application.
#[derive(Debug)]
pub struct Source {
    app: String,
    name: String,
    priority: i64,
    kind: SourceKind,
    checksums: Vec<(ChecksumAlgorithm, Expected)>,
    fingerprints: Vec<(FingerprintAlgorithm, Expected)>,
    package_path: PathBuf,
    repo_dir: PathBuf,
    policy: VerifyPolicy,
    docs: Documents,
    version: OnceCell<Result<Version, String>>,
    download_url: OnceCell<Result<String, String>>,
}

impl Source {
    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    /// Resolve every expected value into the hex strings the engine compares.
    async fn expectations(&self) -> Result<Expectations, SourceError> {
        let metadata_url = self.kind.metadata_url();
        let mut expectations = Expectations::default();
        for (algorithm, expected) in &self.checksums {
            let value = self.docs.evaluate(expected, metadata_url).await?;
            expectations.checksums.push((*algorithm, value));
        }
        for (algorithm, expected) in &self.fingerprints {
            let value = self.docs.evaluate(expected, metadata_url).await?;
            expectations.fingerprints.push((*algorithm, value));
        }
        Ok(expectations)
    }

    async fn check(&self, path: &Path) -> Result<(), SourceError> {
        let expectations = self.expectations().await?;
        let policy = self.policy.clone();
        let apk = path.to_path_buf();
        let span = Span::current();
        let verification = tokio::task::spawn_blocking(move || {
            span.in_scope(|| apk_verify::verify(&apk, &expectations, &policy))
        })
        .await
        .map_err(join_error)?;
        verification.into_result()?;
        Ok(())
    }
}

/// Memoized failures keep only the reason so they are not wrapped twice.
fn reason(err: SourceError) -> String {
    match err {
        SourceError::Unavailable(reason) => reason,
        other => other.to_string(),
    }
}

fn join_error(err: JoinError) -> SourceError {
    SourceError::Internal(format!("verification task failed: {err}"))
}

#[async_trait]
impl PackageSource for Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    async fn resolve_version(&self) -> Result<Version, SourceError> {
        let resolved = self
            .version
            .get_or_init(|| async {
                let raw = self.kind.version(&self.docs).await.map_err(reason)?;
                let cleaned = clean_version(&raw);
                Version::parse(&cleaned).map_err(|err| format!("unusable version `{raw}`: {err}"))
            })
            .await;
        resolved.clone().map_err(SourceError::Unavailable)
    }

    async fn resolve_download_url(&self) -> Result<String, SourceError> {
        let resolved = self
            .download_url
            .get_or_init(|| async {
                let version = self.resolve_version().await.map_err(reason)?;
                self.kind
                    .download_url(&self.docs, version.as_str())
                    .await
                    .map_err(reason)
            })
            .await;
        resolved.clone().map_err(SourceError::Unavailable)
    }

    #[instrument(skip(self), fields(app = %self.app, source = %self.name))]
    async fn fetch(&self) -> Result<PathBuf, SourceError> {
        let url = self.resolve_download_url().await?;
        let expectations = self.expectations().await?;

        let partial = tempfile::Builder::new()
            .prefix(&format!(".{}-", self.app))
            .suffix(".apk.part")
            .tempfile_in(&self.repo_dir)?;
        tracing::info!(%url, "downloading");
        self.docs.http().download(&url, partial.path()).await?;

        let policy = self.policy.clone();
        let span = Span::current();
        let (partial, verification) = tokio::task::spawn_blocking(move || {
            let verification =
                span.in_scope(|| apk_verify::verify(partial.path(), &expectations, &policy));
            (partial, verification)
        })
        .await
        .map_err(join_error)?;
        verification.into_result()?;

        partial
            .persist(&self.package_path)
            .map_err(|err| SourceError::Io(err.error))?;
        Ok(self.package_path.clone())
    }

    #[instrument(skip(self, path), fields(app = %self.app, source = %self.name))]
    async fn verify(&self, path: &Path) -> Result<(), SourceError> {
        self.check(path).await
    }
}

#[derive(Debug, Deserialize)]
struct SourceConfig {
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    checksums: Vec<ExpectedConfig>,
    #[serde(default)]
    fingerprints: Vec<ExpectedConfig>,
    #[serde(flatten)]
    kind: KindConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpectedConfig {
    algorithm: String,
    expected: ValueConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KindConfig {
    Web {
        url: String,
        version: ExtractorConfig,
        #[serde(default)]
        apk_url: Option<ValueConfig>,
    },
    Github {
        repo: String,
    },
    Apkupdate {
        project: String,
    },
    Apkplz {
        project: String,
    },
}

const COMMON_KEYS: &[&str] = &["type", "priority", "checksums", "fingerprints"];

fn kind_keys(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "web" => Some(&["url", "version", "apk_url"]),
        "github" => Some(&["repo"]),
        "apkupdate" | "apkplz" => Some(&["project"]),
        _ => None,
    }
}

/// Reject keys not known for the source's `type`.
fn reject_unknown_keys(raw: &Value) -> Result<(), String> {
    let Some(object) = raw.as_object() else {
        return Ok(());
    };
    let Some(allowed) = object.get("type").and_then(Value::as_str).and_then(kind_keys) else {
        return Ok(());
    };
    match object
        .keys()
        .find(|key| !COMMON_KEYS.contains(&key.as_str()) && !allowed.contains(&key.as_str()))
    {
        Some(key) => Err(format!("unknown key `{key}`")),
        None => Ok(()),
    }
}

/// Build every configured source, in configuration order.
pub fn build_sources(
    config: &SchleuderConfig,
    settings: &Settings,
    http: &HttpClient,
) -> Result<IndexMap<String, SourceSet>, ConfigurationError> {
    let mut apps = IndexMap::new();
    for (app, sources) in &config.apps {
        validate_app_name(app)?;
        if sources.is_empty() {
            return Err(ConfigurationError::new(app, "-", "no sources configured"));
        }
        let mut built: SourceSet = Vec::with_capacity(sources.len());
        for (name, raw) in sources {
            let source = build_source(app, name, raw, settings, http)?;
            built.push(Arc::new(source));
        }
        apps.insert(app.clone(), built);
    }
    Ok(apps)
}

fn validate_app_name(app: &str) -> Result<(), ConfigurationError> {
    let valid = !app.is_empty()
        && !app.starts_with('.')
        && app
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::new(
            app,
            "-",
            "application names may only contain letters, digits, `.`, `_` and `-`",
        ))
    }
}

/// Construct one source from its raw configuration value.
pub fn build_source(
    app: &str,
    name: &str,
    raw: &Value,
    settings: &Settings,
    http: &HttpClient,
) -> Result<Source, ConfigurationError> {
    let fail = |reason: String| ConfigurationError::new(app, name, reason);

    let config: SourceConfig = serde_json::from_value(raw.clone()).map_err(|err| fail(err.to_string()))?;
    reject_unknown_keys(raw).map_err(&fail)?;

    let kind = match config.kind {
        KindConfig::Web {
            url,
            version,
            apk_url,
        } => SourceKind::Web(WebSource::new(&url, &version, apk_url.as_ref()).map_err(fail)?),
        KindConfig::Github { repo } => SourceKind::Github(GithubSource::new(&repo).map_err(fail)?),
        KindConfig::Apkupdate { project } => {
            SourceKind::Mirror(MirrorSource::new(MirrorSite::ApkUpdate, &project).map_err(fail)?)
        }
        KindConfig::Apkplz { project } => {
            SourceKind::Mirror(MirrorSource::new(MirrorSite::ApkPlz, &project).map_err(fail)?)
        }
    };

    let mut checksums = Vec::with_capacity(config.checksums.len());
    for entry in &config.checksums {
        let algorithm = entry
            .algorithm
            .parse::<ChecksumAlgorithm>()
            .map_err(|err| fail(err.to_string()))?;
        let expected = Expected::compile(&entry.expected).map_err(&fail)?;
        if let Some(value) = expected.as_literal() {
            validate_hex(value, Some(algorithm.hex_len()))
                .map_err(|reason| fail(format!("{algorithm} checksum: {reason}")))?;
        }
        checksums.push((algorithm, expected));
    }

    let mut fingerprints = Vec::with_capacity(config.fingerprints.len());
    for entry in &config.fingerprints {
        let algorithm = entry
            .algorithm
            .parse::<FingerprintAlgorithm>()
            .map_err(|err| fail(err.to_string()))?;
        let expected = match Expected::compile(&entry.expected).map_err(&fail)? {
            Expected::Literal(value) => {
                let normalized = normalize_fingerprint(&value);
                validate_hex(&normalized, Some(algorithm.hex_len()))
                    .map_err(|reason| fail(format!("{algorithm} fingerprint: {reason}")))?;
                Expected::Literal(normalized)
            }
            derived => derived,
        };
        fingerprints.push((algorithm, expected));
    }
    reject_conflicts(&fingerprints).map_err(fail)?;

    Ok(Source {
        app: app.to_string(),
        name: name.to_string(),
        priority: config.priority,
        kind,
        checksums,
        fingerprints,
        package_path: settings.package_path(app),
        repo_dir: settings.repo_dir.clone(),
        policy: settings.verify_policy(),
        docs: Documents::new(http.clone()),
        version: OnceCell::new(),
        download_url: OnceCell::new(),
    })
}

fn validate_hex(value: &str, len: Option<usize>) -> Result<(), String> {
    let value = value.trim();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{value}` is not a hex string"));
    }
    match len {
        Some(len) if value.len() != len => Err(format!(
            "`{value}` has {} hex digits, expected {len}",
            value.len()
        )),
        _ => Ok(()),
    }
}

/// Two different pinned literals for the same algorithm can never both match.
fn reject_conflicts(fingerprints: &[(FingerprintAlgorithm, Expected)]) -> Result<(), String> {
    for (i, (algorithm, expected)) in fingerprints.iter().enumerate() {
        let Some(value) = expected.as_literal() else {
            continue;
        };
        let conflict = fingerprints[i + 1..].iter().find(|(other_alg, other)| {
            other_alg == algorithm && other.as_literal().is_some_and(|other| other != value)
        });
        if conflict.is_some() {
            return Err(format!("conflicting pinned {algorithm} fingerprints"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHA256_FPR: &str = "29:F3:4E:5F:27:F2:11:B4:24:BC:5B:F9:D6:71:62:C0:EA:FB:A2:DA:35:AF:35:C1:64:16:FC:44:62:76:BA:26";

    fn settings() -> Settings {
        Settings::new("/srv/repo")
    }

    fn http() -> HttpClient {
        HttpClient::new(&settings()).expect("client")
    }

    fn build(raw: Value) -> Result<Source, ConfigurationError> {
        build_source("signal", "signal.org", &raw, &settings(), &http())
    }

    #[test]
    fn builds_web_source_with_pins() {
        let source = build(json!({
            "type": "web",
            "priority": 3,
            "url": "https://signal.org/android/apk/",
            "version": { "css": ".version", "pattern": "(?P<value>[0-9.]+)" },
            "checksums": [
                { "algorithm": "sha256", "expected": { "css": ".checksum", "squash": true } }
            ],
            "fingerprints": [
                { "algorithm": "SHA-256", "expected": SHA256_FPR }
            ]
        }))
        .expect("valid source");

        assert_eq!(source.name(), "signal.org");
        assert_eq!(source.priority(), 3);
        assert_eq!(source.package_path, PathBuf::from("/srv/repo/signal.apk"));
        assert!(matches!(source.kind(), SourceKind::Web(_)));
        assert_eq!(source.checksums[0].0, ChecksumAlgorithm::Sha256);
        assert_eq!(
            source.fingerprints[0].1.as_literal(),
            Some("29f34e5f27f211b424bc5bf9d67162c0eafba2da35af35c16416fc446276ba26")
        );
    }

    #[test]
    fn unknown_algorithm_names_app_and_source() {
        let err = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "checksums": [ { "algorithm": "whirlpool", "expected": "00" } ]
        }))
        .unwrap_err();
        assert_eq!(err.app, "signal");
        assert_eq!(err.source_name, "signal.org");
        assert!(err.reason.contains("whirlpool"), "{}", err.reason);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(build(json!({ "type": "ftp", "url": "ftp://example.org" })).is_err());
        assert!(build(json!({ "type": "github", "repo": "not-a-repo" })).is_err());
        assert!(build(json!({ "type": "web", "url": "no url", "version": { "css": "p" } })).is_err());
        assert!(build(json!({ "type": "apkplz", "project": "" })).is_err());
        let short = build(json!({
            "type": "apkupdate",
            "project": "org.thoughtcrime.securesms",
            "fingerprints": [ { "algorithm": "sha1", "expected": "AB:CD" } ]
        }))
        .unwrap_err();
        assert!(short.reason.contains("expected 40"), "{}", short.reason);
    }

    #[test]
    fn misspelled_keys_are_rejected() {
        let err = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "fingerprint": [ { "algorithm": "sha256", "expected": SHA256_FPR } ]
        }))
        .unwrap_err();
        assert!(err.reason.contains("`fingerprint`"), "{}", err.reason);

        let err = build(json!({ "type": "apkplz", "project": "com.wire", "url": "https://wire.com" }))
            .unwrap_err();
        assert!(err.reason.contains("`url`"), "{}", err.reason);

        let err = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "checksums": [ { "algorithm": "sha256", "expected": "00", "expect": "11" } ]
        }))
        .unwrap_err();
        assert!(err.reason.contains("expect"), "{}", err.reason);
    }

    #[test]
    fn literal_checksums_must_match_the_digest_length() {
        let err = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "checksums": [ { "algorithm": "sha256", "expected": "abcd" } ]
        }))
        .unwrap_err();
        assert!(err.reason.contains("expected 64"), "{}", err.reason);

        let sha1 = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "checksums": [ { "algorithm": "sha1", "expected": "ab".repeat(20) } ]
        }));
        assert!(sha1.is_ok());
    }

    #[test]
    fn conflicting_pins_are_rejected() {
        let err = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "fingerprints": [
                { "algorithm": "sha256", "expected": SHA256_FPR },
                { "algorithm": "sha256", "expected": "00".repeat(32) }
            ]
        }))
        .unwrap_err();
        assert!(err.reason.contains("conflicting"), "{}", err.reason);

        let same_value_twice = build(json!({
            "type": "github",
            "repo": "signalapp/Signal-Android",
            "fingerprints": [
                { "algorithm": "sha256", "expected": SHA256_FPR },
                { "algorithm": "sha256", "expected": SHA256_FPR.to_lowercase() },
                { "algorithm": "sha256", "expected": { "json": "/fingerprint" } }
            ]
        }));
        assert!(same_value_twice.is_ok());
    }

    #[test]
    fn factory_keeps_configuration_order() {
        let config: SchleuderConfig = serde_json::from_str(
            r#"{
                "settings": { "repo_dir": "/srv/repo" },
                "apps": {
                    "wire": {
                        "wire.com": { "type": "web", "url": "https://wire.com/en/download/", "version": { "css": ".version" } }
                    },
                    "signal": {
                        "github": { "type": "github", "repo": "signalapp/Signal-Android" },
                        "apkplz": { "type": "apkplz", "project": "signal-private-messenger" }
                    }
                }
            }"#,
        )
        .unwrap();

        let apps = build_sources(&config, &config.settings, &http()).unwrap();
        assert_eq!(apps.keys().collect::<Vec<_>>(), vec!["wire", "signal"]);
        let names: Vec<_> = apps["signal"].iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["github", "apkplz"]);
    }

    #[test]
    fn rejects_unsafe_app_names_and_empty_apps() {
        for bad in ["", "../etc", ".hidden", "a/b"] {
            assert!(validate_app_name(bad).is_err(), "{bad}");
        }
        assert!(validate_app_name("org.videolan.vlc").is_ok());

        let config: SchleuderConfig = serde_json::from_str(
            r#"{ "settings": { "repo_dir": "/srv/repo" }, "apps": { "empty": {} } }"#,
        )
        .unwrap();
        let err = build_sources(&config, &config.settings, &http())
            .err()
            .expect("an app without sources is rejected");
        assert_eq!(err.app, "empty");
    }
}
