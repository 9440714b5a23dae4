use crate::checker::{ApiQuota, Checker, version_changed, version_changed_with_newer_date};
use crate::db::SavedRecord;
use crate::error::CheckError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::info::{InfoKey, InfoSnapshot};
use async_trait::async_trait;
use serde::Deserialize;

const API_BASE: &str = "https://api.github.com/repos";

/// Unauthenticated REST API allowance per client address.
const API_QUOTA: ApiQuota = ApiQuota {
    api: "GitHub",
    per_hour: 60,
};

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    name: Option<String>,
    published_at: Option<String>,
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
    size: u64,
}

/// The latest release of a GitHub repository.
#[derive(Debug, Clone)]
pub struct GithubRelease {
    id: &'static str,
    display_name: &'static str,
    repository: &'static str,
    asset_filter: Option<&'static str>,
    require_newer_date: bool,
    /// Checksum asset found by `do_check`, read in `after_check`.
    sha256_url: Option<String>,
}

impl GithubRelease {
    pub fn new(id: &'static str, display_name: &'static str, repository: &'static str) -> Self {
        Self {
            id,
            display_name,
            repository,
            asset_filter: None,
            require_newer_date: false,
            sha256_url: None,
        }
    }

    /// Only consider assets whose name contains `filter`.
    pub fn asset(mut self, filter: &'static str) -> Self {
        self.asset_filter = Some(filter);
        self
    }

    /// Ignore re-tagged releases that are not newer than the saved one.
    pub fn newer_date_only(mut self) -> Self {
        self.require_newer_date = true;
        self
    }

    fn apply(&mut self, release: Release, info: &mut InfoSnapshot) {
        info.set(InfoKey::LatestVersion, &release.tag_name);
        info.set(InfoKey::BuildVersion, release.name);
        info.set(InfoKey::BuildDate, release.published_at);
        info.set(InfoKey::BuildChangelog, release.body.filter(|body| !body.trim().is_empty()));

        let asset = release.assets.iter().find(|asset| {
            !asset.name.ends_with(".sha256")
                && self.asset_filter.is_none_or(|filter| asset.name.contains(filter))
        });

        match asset {
            Some(asset) => {
                info.set(InfoKey::DownloadLink, &asset.browser_download_url);
                info.set(InfoKey::FileSize, format_size(asset.size));

                let sidecar = format!("{}.sha256", asset.name);
                self.sha256_url = release
                    .assets
                    .iter()
                    .find(|candidate| candidate.name == sidecar)
                    .map(|candidate| candidate.browser_download_url.clone());
            }
            None => {
                info.set(InfoKey::DownloadLink, release.html_url);
                self.sha256_url = None;
            }
        }
    }
}

#[async_trait]
impl Checker for GithubRelease {
    fn id(&self) -> &str {
        self.id
    }

    fn display_name(&self) -> &str {
        self.display_name
    }

    fn api_quota(&self) -> Option<ApiQuota> {
        Some(API_QUOTA)
    }

    async fn do_check(&mut self, fetch: &Fetcher, info: &mut InfoSnapshot) -> Result<(), CheckError> {
        let request = FetchRequest::get(&format!("{API_BASE}/{}/releases/latest", self.repository))?
            .header("accept", "application/vnd.github+json");

        let release: Release = fetch.fetch_json(request).await?;
        self.apply(release, info);

        Ok(())
    }

    async fn after_check(&mut self, fetch: &Fetcher, info: &mut InfoSnapshot) -> Result<(), CheckError> {
        if let Some(url) = &self.sha256_url {
            info.set(InfoKey::FileSha256, fetch.fetch_hash_file(url).await);
        }

        Ok(())
    }

    fn is_updated(&self, fresh: &InfoSnapshot, saved: Option<&SavedRecord>) -> bool {
        if self.require_newer_date {
            version_changed_with_newer_date(fresh, saved)
        } else {
            version_changed(fresh, saved)
        }
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
