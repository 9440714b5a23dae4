use crate::error::CheckError;
use serde::Serialize;
use serde::ser::SerializeMap;
use std::fmt;
use std::str::FromStr;

/// The closed set of fields a checker may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoKey {
    LatestVersion,
    BuildType,
    BuildVersion,
    BuildDate,
    BuildChangelog,
    FileMd5,
    FileSha1,
    FileSha256,
    DownloadLink,
    FileSize,
}

impl InfoKey {
    pub const ALL: [InfoKey; 10] = [
        InfoKey::LatestVersion,
        InfoKey::BuildType,
        InfoKey::BuildVersion,
        InfoKey::BuildDate,
        InfoKey::BuildChangelog,
        InfoKey::FileMd5,
        InfoKey::FileSha1,
        InfoKey::FileSha256,
        InfoKey::DownloadLink,
        InfoKey::FileSize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LatestVersion => "LATEST_VERSION",
            Self::BuildType => "BUILD_TYPE",
            Self::BuildVersion => "BUILD_VERSION",
            Self::BuildDate => "BUILD_DATE",
            Self::BuildChangelog => "BUILD_CHANGELOG",
            Self::FileMd5 => "FILE_MD5",
            Self::FileSha1 => "FILE_SHA1",
            Self::FileSha256 => "FILE_SHA256",
            Self::DownloadLink => "DOWNLOAD_LINK",
            Self::FileSize => "FILE_SIZE",
        }
    }

    /// Human readable label used in notification bodies.
    pub fn label(self) -> &'static str {
        match self {
            Self::LatestVersion => "Version",
            Self::BuildType => "Build type",
            Self::BuildVersion => "Build version",
            Self::BuildDate => "Build date",
            Self::BuildChangelog => "Changelog",
            Self::FileMd5 => "MD5",
            Self::FileSha1 => "SHA1",
            Self::FileSha256 => "SHA256",
            Self::DownloadLink => "Download",
            Self::FileSize => "Size",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for InfoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InfoKey {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InfoKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| CheckError::InvalidInfoKey(s.to_owned()))
    }
}

/// A value on its way into a snapshot.
///
/// Structured values are stored as their compact JSON encoding, `null` and
/// `None` are stored as absent.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Absent,
    Text(String),
    Structured(serde_json::Value),
}

impl InfoValue {
    fn into_stored(self) -> Option<String> {
        match self {
            Self::Absent => None,
            Self::Text(text) => Some(text),
            Self::Structured(serde_json::Value::Null) => None,
            Self::Structured(serde_json::Value::String(text)) => Some(text),
            Self::Structured(value) => Some(value.to_string()),
        }
    }
}

impl From<&str> for InfoValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for InfoValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for InfoValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<u64> for InfoValue {
    fn from(value: u64) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for InfoValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

impl<T: Into<InfoValue>> From<Option<T>> for InfoValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Absent)
    }
}

/// Ordered record of everything one check observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoSnapshot {
    values: [Option<String>; 10],
}

impl InfoSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: InfoKey) -> Option<&str> {
        self.values[key.index()].as_deref()
    }

    pub fn latest_version(&self) -> Option<&str> {
        self.get(InfoKey::LatestVersion)
    }

    pub fn set(&mut self, key: InfoKey, value: impl Into<InfoValue>) {
        self.values[key.index()] = value.into().into_stored();
    }

    /// Set a field addressed by its wire name, e.g. `"FILE_SHA256"`.
    pub fn set_by_name(&mut self, key: &str, value: impl Into<InfoValue>) -> Result<(), CheckError> {
        let key = key.parse::<InfoKey>()?;
        self.set(key, value);
        Ok(())
    }

    /// All fields in declaration order, including absent ones.
    pub fn iter(&self) -> impl Iterator<Item = (InfoKey, Option<&str>)> + '_ {
        InfoKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    pub fn present(&self) -> impl Iterator<Item = (InfoKey, &str)> + '_ {
        self.iter().filter_map(|(key, value)| value.map(|v| (key, v)))
    }
}

impl FromIterator<(InfoKey, Option<String>)> for InfoSnapshot {
    fn from_iter<I: IntoIterator<Item = (InfoKey, Option<String>)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (key, value) in iter {
            snapshot.set(key, value);
        }
        snapshot
    }
}

impl Serialize for InfoSnapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key.as_str(), &value)?;
        }
        map.end()
    }
}
