use crate::checker::{Checker, newest_matching, parse_build_date};
use crate::error::CheckError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::info::{InfoKey, InfoSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Listings with every file of a project can be slow to render.
const LISTING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FileListing {
    #[serde(default)]
    files: Vec<PlingFile>,
}

#[derive(Debug, Deserialize)]
struct PlingFile {
    name: String,
    updated_timestamp: String,
    md5sum: Option<String>,
    #[serde(default)]
    tags: String,
}

/// Newest file of a Pling project.
///
/// Several checkers usually watch the same project listing, so responses are
/// shared through the request cache.
#[derive(Debug, Clone)]
pub struct PlingFiles {
    id: &'static str,
    display_name: &'static str,
    project_id: u64,
    name_filter: Option<&'static str>,
}

impl PlingFiles {
    pub fn new(id: &'static str, display_name: &'static str, project_id: u64) -> Self {
        Self {
            id,
            display_name,
            project_id,
            name_filter: None,
        }
    }

    /// Only consider files whose name contains `filter`.
    pub fn matching(mut self, filter: &'static str) -> Self {
        self.name_filter = Some(filter);
        self
    }

    fn apply(&self, listing: FileListing, info: &mut InfoSnapshot) -> Result<(), CheckError> {
        let newest = newest_matching(
            listing.files,
            |file| parse_build_date(&file.updated_timestamp),
            |file| self.name_filter.is_none_or(|filter| file.name.contains(filter)),
        );

        let Some(file) = newest else {
            return Ok(());
        };

        let link = urlencoding::decode(&file.tags)
            .map_err(|e| CheckError::format(format!("undecodable download tag: {e}")))?;
        let link = link.trim_start_matches("link##");

        info.set(InfoKey::LatestVersion, &file.name);
        info.set(InfoKey::BuildDate, &file.updated_timestamp);
        info.set(InfoKey::FileMd5, file.md5sum);
        info.set(InfoKey::DownloadLink, (!link.is_empty()).then_some(link));

        Ok(())
    }
}

#[async_trait]
impl Checker for PlingFiles {
    fn id(&self) -> &str {
        self.id
    }

    fn display_name(&self) -> &str {
        self.display_name
    }

    fn uses_cache(&self) -> bool {
        true
    }

    async fn do_check(&mut self, fetch: &Fetcher, info: &mut InfoSnapshot) -> Result<(), CheckError> {
        let request = FetchRequest::get(&format!(
            "https://www.pling.com/p/{}/getfilesajax",
            self.project_id
        ))?
        .param("format", "json")
        .param("ignore_status_code", 1)
        .param("status", "all")
        .param("perpage", 1000)
        .param("page", 1)
        .timeout(LISTING_TIMEOUT);

        let listing: FileListing = fetch.fetch_json(request).await?;
        self.apply(listing, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> FileListing {
        serde_json::from_value(json!({
            "files": [
                {
                    "name": "DerpFest-10-Official-20200105-gapps.zip",
                    "updated_timestamp": "2020-01-05 10:00:00",
                    "md5sum": "aaa",
                    "tags": "link##https%3A%2F%2Fexample.org%2Fgapps-0105.zip"
                },
                {
                    "name": "DerpFest-10-Official-20200112-vanilla.zip",
                    "updated_timestamp": "2020-01-12 10:00:00",
                    "md5sum": "bbb",
                    "tags": "link##https%3A%2F%2Fexample.org%2Fvanilla-0112.zip"
                },
                {
                    "name": "DerpFest-10-Official-20200101-vanilla.zip",
                    "updated_timestamp": "2020-01-01 10:00:00",
                    "md5sum": null
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn takes_the_newest_file() {
        let checker = PlingFiles::new("DerpFest", "DerpFest", 1338683);
        let mut info = InfoSnapshot::new();

        checker.apply(listing(), &mut info).unwrap();

        assert_eq!(info.latest_version(), Some("DerpFest-10-Official-20200112-vanilla.zip"));
        assert_eq!(info.get(InfoKey::FileMd5), Some("bbb"));
        assert_eq!(
            info.get(InfoKey::DownloadLink),
            Some("https://example.org/vanilla-0112.zip")
        );
    }

    #[test]
    fn name_filter_narrows_the_candidates() {
        let checker = PlingFiles::new("DerpFestGapps", "DerpFest GApps", 1338683).matching("gapps");
        let mut info = InfoSnapshot::new();

        checker.apply(listing(), &mut info).unwrap();

        assert_eq!(info.latest_version(), Some("DerpFest-10-Official-20200105-gapps.zip"));
        assert_eq!(info.get(InfoKey::BuildDate), Some("2020-01-05 10:00:00"));
    }

    #[test]
    fn empty_listing_leaves_the_snapshot_empty() {
        let checker = PlingFiles::new("DerpFest", "DerpFest", 1338683);
        let mut info = InfoSnapshot::new();

        checker.apply(FileListing { files: Vec::new() }, &mut info).unwrap();

        assert_eq!(info.present().count(), 0);
    }
}
