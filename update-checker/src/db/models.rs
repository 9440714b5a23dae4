use crate::info::{InfoKey, InfoSnapshot};
use serde::{Deserialize, Serialize};

/// A `saved` table row exactly as stored.
#[derive(Debug, Clone, Deserialize)]
pub struct SavedRow {
    pub id: String,
    pub full_name: String,
    pub latest_version: Option<String>,
    pub build_type: Option<String>,
    pub build_version: Option<String>,
    pub build_date: Option<String>,
    pub build_changelog: Option<String>,
    pub file_md5: Option<String>,
    pub file_sha1: Option<String>,
    pub file_sha256: Option<String>,
    pub download_link: Option<String>,
    pub file_size: Option<String>,
}

/// The last recorded state of one checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedRecord {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FULL_NAME")]
    pub full_name: String,

    #[serde(flatten)]
    pub info: InfoSnapshot,
}

impl From<SavedRow> for SavedRecord {
    fn from(row: SavedRow) -> Self {
        let info = [
            (InfoKey::LatestVersion, row.latest_version),
            (InfoKey::BuildType, row.build_type),
            (InfoKey::BuildVersion, row.build_version),
            (InfoKey::BuildDate, row.build_date),
            (InfoKey::BuildChangelog, row.build_changelog),
            (InfoKey::FileMd5, row.file_md5),
            (InfoKey::FileSha1, row.file_sha1),
            (InfoKey::FileSha256, row.file_sha256),
            (InfoKey::DownloadLink, row.download_link),
            (InfoKey::FileSize, row.file_size),
        ]
        .into_iter()
        .collect();

        Self {
            id: row.id,
            full_name: row.full_name,
            info,
        }
    }
}
