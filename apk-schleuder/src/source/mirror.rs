use std::fmt;

use super::expected::{Documents, Extractor};
use crate::types::SourceError;

/// APK mirror sites with a fixed page layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorSite {
    ApkUpdate,
    ApkPlz,
}

impl MirrorSite {
    fn app_page(self, project: &str) -> String {
        match self {
            MirrorSite::ApkUpdate => format!("https://apkupdate.com/apk/{project}/"),
            MirrorSite::ApkPlz => format!("https://apkplz.net/app/{project}"),
        }
    }

    fn download_page(self, project: &str) -> String {
        match self {
            MirrorSite::ApkUpdate => format!("https://apkupdate.com/apk/{project}/download/"),
            MirrorSite::ApkPlz => format!("https://apkplz.net/download-app/{project}"),
        }
    }
}

impl fmt::Display for MirrorSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorSite::ApkUpdate => f.write_str("apkupdate"),
            MirrorSite::ApkPlz => f.write_str("apkplz"),
        }
    }
}

/// One project on a mirror site: version from the app page, link from the download page.
#[derive(Debug)]
pub struct MirrorSource {
    site: MirrorSite,
    app_page: String,
    download_page: String,
    version: Extractor,
    link: Extractor,
}

impl MirrorSource {
    pub fn new(site: MirrorSite, project: &str) -> Result<Self, String> {
        let project = project.trim_matches('/');
        let valid = !project.is_empty()
            && !project.starts_with('.')
            && project
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(format!("`{project}` is not a {site} project"));
        }
        Ok(Self {
            site,
            app_page: site.app_page(project),
            download_page: site.download_page(project),
            version: Extractor::css(r#"[itemprop="softwareVersion"]"#, None)?,
            link: Extractor::css(r#"a[href$=".apk"]"#, Some("href"))?,
        })
    }

    pub fn site(&self) -> MirrorSite {
        self.site
    }

    pub fn download_page(&self) -> &str {
        &self.download_page
    }

    pub(super) async fn version(&self, docs: &Documents) -> Result<String, SourceError> {
        docs.extract(&self.version, &self.app_page).await
    }

    pub(super) async fn download_url(&self, docs: &Documents) -> Result<String, SourceError> {
        let link = docs.extract(&self.link, &self.download_page).await?;
        reqwest::Url::parse(&self.download_page)
            .and_then(|base| base.join(&link))
            .map(String::from)
            .map_err(|err| SourceError::unavailable(format!("bad package link `{link}`: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_follow_the_site_layout() {
        let plz = MirrorSource::new(MirrorSite::ApkPlz, "org.thoughtcrime.securesms").unwrap();
        assert_eq!(plz.app_page, "https://apkplz.net/app/org.thoughtcrime.securesms");
        assert_eq!(
            plz.download_page(),
            "https://apkplz.net/download-app/org.thoughtcrime.securesms"
        );

        let update = MirrorSource::new(MirrorSite::ApkUpdate, "/com.wire/").unwrap();
        assert_eq!(update.site(), MirrorSite::ApkUpdate);
        assert_eq!(update.download_page(), "https://apkupdate.com/apk/com.wire/download/");
    }

    #[test]
    fn scrapes_version_and_link() {
        let mirror = MirrorSource::new(MirrorSite::ApkPlz, "com.wire").unwrap();
        let app_page = r#"<div><span itemprop="softwareVersion">3.82.38</span></div>"#;
        let download_page = r#"<p><a href="https://dl.apkplz.net/files/com.wire_3.82.38.apk">Download</a></p>"#;
        assert_eq!(mirror.version.extract(app_page).unwrap(), "3.82.38");
        assert_eq!(
            mirror.link.extract(download_page).unwrap(),
            "https://dl.apkplz.net/files/com.wire_3.82.38.apk"
        );
    }

    #[test]
    fn rejects_projects_outside_the_site() {
        for bad in ["", "com wire", "../etc", "a/b", "..", ".hidden", "app?x=1", "a#b"] {
            assert!(MirrorSource::new(MirrorSite::ApkUpdate, bad).is_err(), "{bad}");
            assert!(MirrorSource::new(MirrorSite::ApkPlz, bad).is_err(), "{bad}");
        }
        assert!(MirrorSource::new(MirrorSite::ApkPlz, "signal-private_messenger.2").is_ok());
    }
}
