use reqwest::Url;

use super::expected::{Documents, Expected, Extractor, ExtractorConfig, ValueConfig};
use crate::types::SourceError;

const DEFAULT_APK_LINK: &str = r#"a[href$=".apk"]"#;

/// A vendor download page scraped with configured extractors.
#[derive(Debug)]
pub struct WebSource {
    page_url: Url,
    version: Extractor,
    apk_url: Expected,
}

impl WebSource {
    pub fn new(
        page_url: &str,
        version: &ExtractorConfig,
        apk_url: Option<&ValueConfig>,
    ) -> Result<Self, String> {
        let page_url =
            Url::parse(page_url).map_err(|err| format!("invalid URL `{page_url}`: {err}"))?;
        let apk_url = match apk_url {
            Some(config) => Expected::compile(config)?,
            None => Expected::Derived(Extractor::css(DEFAULT_APK_LINK, Some("href"))?),
        };
        Ok(Self {
            page_url,
            version: Extractor::compile(version)?,
            apk_url,
        })
    }

    pub fn page_url(&self) -> &str {
        self.page_url.as_str()
    }

    pub(super) async fn version(&self, docs: &Documents) -> Result<String, SourceError> {
        docs.extract(&self.version, self.page_url()).await
    }

    pub(super) async fn download_url(
        &self,
        docs: &Documents,
        version: &str,
    ) -> Result<String, SourceError> {
        let link = match &self.apk_url {
            Expected::Literal(template) => template.replace("{version}", version),
            Expected::Derived(extractor) => docs.extract(extractor, self.page_url()).await?,
        };
        self.resolve_link(&link)
    }

    /// Resolve a possibly relative link against the download page.
    fn resolve_link(&self, link: &str) -> Result<String, SourceError> {
        self.page_url
            .join(link.trim())
            .map(String::from)
            .map_err(|err| SourceError::unavailable(format!("bad package link `{link}`: {err}")))
    }
}
