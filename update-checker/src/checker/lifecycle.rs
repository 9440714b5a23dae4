use crate::cache::RequestCache;
use crate::checker::Checker;
use crate::db::{Database, SavedRecord};
use crate::error::CheckError;
use crate::fetch::{Fetcher, HttpClient};
use crate::info::InfoSnapshot;
use crate::notify::Messenger;
use std::fmt;
use std::sync::Arc;

/// Where a [`CheckRun`] is in its lifecycle.
///
/// `Created -> Checked -> Updated -> Finalized -> Persisted -> Notified`, or
/// `Checked -> NotUpdated`. A failed `do_check` lands in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Checked,
    Failed,
    Updated,
    NotUpdated,
    Finalized,
    Persisted,
    Notified,
}

impl Stage {
    fn has_snapshot(self) -> bool {
        !matches!(self, Self::Created | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Checked => "checked",
            Self::Failed => "failed",
            Self::Updated => "updated",
            Self::NotUpdated => "not updated",
            Self::Finalized => "finalized",
            Self::Persisted => "persisted",
            Self::Notified => "notified",
        };
        f.write_str(name)
    }
}

/// One checker instance driven through a single check.
///
/// Every step past `check` verifies the current stage first, so a step
/// invoked out of order fails with [`CheckError::Lifecycle`] instead of
/// working on an empty snapshot.
pub struct CheckRun {
    checker: Box<dyn Checker>,
    fetcher: Fetcher,
    info: InfoSnapshot,
    stage: Stage,
}

impl CheckRun {
    /// `cache` is only handed to checkers that opted into caching.
    pub fn new(checker: Box<dyn Checker>, http: &HttpClient, cache: Option<Arc<RequestCache>>) -> Self {
        let cache = cache.filter(|_| checker.uses_cache());

        Self {
            fetcher: Fetcher::new(http.clone(), cache),
            checker,
            info: InfoSnapshot::new(),
            stage: Stage::Created,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn uses_cache(&self) -> bool {
        self.fetcher.is_cached()
    }

    /// Run `do_check` on a fresh snapshot.
    pub async fn check(&mut self) -> Result<(), CheckError> {
        self.require("check", &[Stage::Created, Stage::Checked, Stage::Failed])?;

        let mut info = InfoSnapshot::new();
        match self.checker.do_check(&self.fetcher, &mut info).await {
            Ok(()) => {
                self.info = info;
                self.stage = Stage::Checked;
                Ok(())
            }
            Err(err) => {
                self.info = InfoSnapshot::new();
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> Result<InfoSnapshot, CheckError> {
        self.require_snapshot("snapshot")?;
        Ok(self.info.clone())
    }

    /// Compare against the saved record and decide whether this is an update.
    pub fn evaluate(&mut self, saved: Option<&SavedRecord>, force: bool) -> Result<bool, CheckError> {
        self.require("evaluate", &[Stage::Checked])?;

        let updated = force || self.checker.is_updated(&self.info, saved);
        self.stage = if updated {
            Stage::Updated
        } else {
            Stage::NotUpdated
        };

        Ok(updated)
    }

    /// Run `after_check`. A failure there is logged and otherwise ignored,
    /// the update already detected still goes through.
    pub async fn finalize(&mut self) -> Result<(), CheckError> {
        self.require("finalize", &[Stage::Updated])?;

        if let Err(err) = self.checker.after_check(&self.fetcher, &mut self.info).await {
            tracing::warn!(
                "{}: after_check failed, keeping the detected update: {}",
                self.checker.id(),
                err
            );
        }

        self.stage = Stage::Finalized;
        Ok(())
    }

    pub async fn persist(&mut self, database: &Database) -> Result<(), CheckError> {
        self.require("persist", &[Stage::Finalized])?;

        database
            .upsert(self.checker.id(), self.checker.display_name(), &self.info)
            .await?;

        self.stage = Stage::Persisted;
        Ok(())
    }

    pub fn message(&self) -> Result<String, CheckError> {
        self.require_snapshot("message")?;
        Ok(self.checker.message(&self.info))
    }

    /// Hand the formatted message to the messenger; returns whether it was delivered.
    pub async fn notify(&mut self, messenger: &Messenger, destination: &str) -> Result<bool, CheckError> {
        self.require("notify", &[Stage::Persisted])?;

        let delivered = messenger.send(&self.message()?, destination).await;

        self.stage = Stage::Notified;
        Ok(delivered)
    }

    fn require(&self, operation: &'static str, allowed: &[Stage]) -> Result<(), CheckError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(CheckError::Lifecycle {
                operation,
                stage: self.stage,
            })
        }
    }

    fn require_snapshot(&self, operation: &'static str) -> Result<(), CheckError> {
        if self.stage.has_snapshot() {
            Ok(())
        } else {
            Err(CheckError::Lifecycle {
                operation,
                stage: self.stage,
            })
        }
    }
}
