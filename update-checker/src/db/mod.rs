mod models;
pub use models::*;

use crate::error::CheckerError;
use crate::info::{InfoKey, InfoSnapshot};
use futures::{TryStreamExt, future};
use libsql::Connection;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

const SELECT_SAVED: &str = r#"
    SELECT id, full_name, latest_version, build_type, build_version, build_date,
           build_changelog, file_md5, file_sha1, file_sha256, download_link, file_size
    FROM saved
"#;

/// Durable "latest known state" per checker identity.
///
/// Every statement touches a single row keyed by identity, so concurrent
/// checkers never contend on anything broader than the connection itself.
#[derive(Clone)]
pub struct Database {
    _database: Arc<libsql::Database>,
    connection: Connection,
}

fn from_row(row: &libsql::Row) -> Result<SavedRecord, CheckerError> {
    libsql::de::from_row::<SavedRow>(row)
        .map(SavedRecord::from)
        .map_err(|e| {
            tracing::error!("Failed to deserialize saved record: {}", e);
            CheckerError::from(e)
        })
}

impl Database {
    /// Open (and if necessary create) the database file.
    pub async fn setup(path: &Path) -> Result<Self, CheckerError> {
        tracing::debug!("Setting up database at {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                tracing::error!("Failed to create database directory: {}", e);
                e
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await?;
        Self::connect(db).await
    }

    /// A private database that lives as long as this handle.
    pub async fn in_memory() -> Result<Self, CheckerError> {
        let db = libsql::Builder::new_local(":memory:").build().await?;
        Self::connect(db).await
    }

    async fn connect(db: libsql::Database) -> Result<Self, CheckerError> {
        let connection = db.connect()?;

        connection.query("PRAGMA journal_mode = WAL", ()).await?;
        connection.query("PRAGMA synchronous = NORMAL", ()).await?;

        tracing::debug!("Connected to database");
        Self::ensure_db_structure(&connection).await?;

        Ok(Self {
            _database: Arc::new(db),
            connection,
        })
    }

    async fn ensure_db_structure(connection: &Connection) -> Result<(), CheckerError> {
        tracing::trace!("Setting up database structure...");

        connection
            .execute(
                r#"
                CREATE TABLE IF NOT EXISTS saved (
                    id TEXT PRIMARY KEY NOT NULL,
                    full_name TEXT NOT NULL,
                    latest_version TEXT DEFAULT NULL,
                    build_type TEXT DEFAULT NULL,
                    build_version TEXT DEFAULT NULL,
                    build_date TEXT DEFAULT NULL,
                    build_changelog TEXT DEFAULT NULL,
                    file_md5 TEXT DEFAULT NULL,
                    file_sha1 TEXT DEFAULT NULL,
                    file_sha256 TEXT DEFAULT NULL,
                    download_link TEXT DEFAULT NULL,
                    file_size TEXT DEFAULT NULL
                )
            "#,
                (),
            )
            .await?;

        tracing::trace!("Database structure created.");

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn known_ids(&self) -> Result<HashSet<String>, CheckerError> {
        self.connection
            .query("SELECT id FROM saved", ())
            .await?
            .into_stream()
            .and_then(|r| future::ready(r.get_str(0).map(|v| v.to_string())))
            .map_err(CheckerError::from)
            .try_collect()
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<SavedRecord>, CheckerError> {
        let mut rows = self
            .connection
            .query(&format!("{SELECT_SAVED} WHERE id = ?1"), libsql::params![id])
            .await?;

        match rows.next().await? {
            Some(row) => from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    /// Every saved record, ordered by display name.
    #[tracing::instrument(skip(self))]
    pub async fn all(&self) -> Result<Vec<SavedRecord>, CheckerError> {
        let mut rows = self
            .connection
            .query(&format!("{SELECT_SAVED} ORDER BY full_name, id"), ())
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(from_row(&row)?);
        }

        Ok(records)
    }

    #[tracing::instrument(skip(self, info))]
    pub async fn upsert(
        &self,
        id: &str,
        full_name: &str,
        info: &InfoSnapshot,
    ) -> Result<(), CheckerError> {
        self.connection
            .execute(
                r#"
                INSERT INTO saved (
                    id, full_name, latest_version, build_type, build_version, build_date,
                    build_changelog, file_md5, file_sha1, file_sha256, download_link, file_size
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT (id) DO UPDATE SET
                    full_name = ?2, latest_version = ?3, build_type = ?4, build_version = ?5,
                    build_date = ?6, build_changelog = ?7, file_md5 = ?8, file_sha1 = ?9,
                    file_sha256 = ?10, download_link = ?11, file_size = ?12
                "#,
                libsql::params![
                    id,
                    full_name,
                    info.get(InfoKey::LatestVersion),
                    info.get(InfoKey::BuildType),
                    info.get(InfoKey::BuildVersion),
                    info.get(InfoKey::BuildDate),
                    info.get(InfoKey::BuildChangelog),
                    info.get(InfoKey::FileMd5),
                    info.get(InfoKey::FileSha1),
                    info.get(InfoKey::FileSha256),
                    info.get(InfoKey::DownloadLink),
                    info.get(InfoKey::FileSize)
                ],
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), CheckerError> {
        self.connection
            .execute("DELETE FROM saved WHERE id = ?1", libsql::params![id])
            .await?;

        Ok(())
    }

    /// Remove every record whose identity is not in `active`.
    #[tracing::instrument(skip_all)]
    pub async fn delete_missing(
        &self,
        active: &HashSet<String>,
    ) -> Result<BTreeSet<String>, CheckerError> {
        let known = self.known_ids().await?;
        let removed: BTreeSet<String> = known.difference(active).cloned().collect();

        for id in &removed {
            tracing::info!("Checker disappeared: {}", id);
            self.delete(id).await?;
        }

        Ok(removed)
    }
}
