mod helpers;
mod lifecycle;
mod registry;

pub use helpers::*;
pub use lifecycle::{CheckRun, Stage};
pub use registry::{CheckerEntry, Registry};

#[cfg(test)]
pub(crate) use lifecycle::testing;

use crate::db::SavedRecord;
use crate::error::CheckError;
use crate::fetch::Fetcher;
use crate::info::InfoSnapshot;
use async_trait::async_trait;

/// Request allowance of a rate-limited upstream API, shared by every
/// checker that names the same `api`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiQuota {
    pub api: &'static str,
    pub per_hour: u64,
}

/// One source adapter.
///
/// Implementors carry all of their configuration as fields fixed at
/// construction; whatever `do_check` needs to hand over to `after_check`
/// lives in fields as well.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Stable identity, used as the persistence key.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Opt into the per-cycle request cache for every request of this type.
    fn uses_cache(&self) -> bool {
        false
    }

    /// Skip this checker without dropping its saved state.
    fn is_disabled(&self) -> bool {
        false
    }

    /// Rate-limited API that every check of this type spends one request of.
    fn api_quota(&self) -> Option<ApiQuota> {
        None
    }

    /// Fetch the source and fill in `info`. Must be safe to run again.
    async fn do_check(&mut self, fetch: &Fetcher, info: &mut InfoSnapshot) -> Result<(), CheckError>;

    /// Expensive follow-up work, only run once a change has been detected.
    async fn after_check(
        &mut self,
        _fetch: &Fetcher,
        _info: &mut InfoSnapshot,
    ) -> Result<(), CheckError> {
        Ok(())
    }

    fn is_updated(&self, fresh: &InfoSnapshot, saved: Option<&SavedRecord>) -> bool {
        version_changed(fresh, saved)
    }

    fn message(&self, info: &InfoSnapshot) -> String {
        render_message(self.display_name(), info)
    }
}
