use serde::Deserialize;

use super::expected::Documents;
use crate::types::SourceError;

const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

/// Latest release of a GitHub repository.
#[derive(Debug)]
pub struct GithubSource {
    repo: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    #[serde(default)]
    content_type: String,
    browser_download_url: String,
}

impl GithubSource {
    pub fn new(repo: &str) -> Result<Self, String> {
        let valid = repo.split('/').count() == 2
            && repo.split('/').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            });
        if !valid {
            return Err(format!("`{repo}` is not an `owner/name` repository"));
        }
        Ok(Self {
            repo: repo.to_string(),
            api_url: format!("https://api.github.com/repos/{repo}/releases/latest"),
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn release(&self, docs: &Documents) -> Result<Release, SourceError> {
        let body = docs.get(&self.api_url).await?;
        parse_release(&body)
    }

    pub(super) async fn version(&self, docs: &Documents) -> Result<String, SourceError> {
        Ok(self.release(docs).await?.tag_name)
    }

    pub(super) async fn download_url(&self, docs: &Documents) -> Result<String, SourceError> {
        pick_asset(&self.release(docs).await?)
    }
}

fn parse_release(body: &str) -> Result<Release, SourceError> {
    serde_json::from_str(body)
        .map_err(|err| SourceError::unavailable(format!("unexpected release metadata: {err}")))
}

fn pick_asset(release: &Release) -> Result<String, SourceError> {
    let mut apks = release
        .assets
        .iter()
        .filter(|asset| asset.name.ends_with(".apk") && asset.content_type == APK_CONTENT_TYPE);
    match (apks.next(), apks.next()) {
        (Some(asset), None) => Ok(asset.browser_download_url.clone()),
        (None, _) => Err(SourceError::unavailable(format!(
            "release {} has no APK asset",
            release.tag_name
        ))),
        (Some(_), Some(_)) => Err(SourceError::unavailable(format!(
            "release {} has more than one APK asset",
            release.tag_name
        ))),
    }
}
