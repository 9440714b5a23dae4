use crate::checker::{ApiQuota, Checker};
use crate::error::CheckerError;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> Box<dyn Checker> + Send + Sync>;

/// A registered checker type; every cycle creates a fresh instance from it.
#[derive(Clone)]
pub struct CheckerEntry {
    id: String,
    display_name: String,
    disabled: bool,
    quota: Option<ApiQuota>,
    factory: Factory,
}

impl CheckerEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn api_quota(&self) -> Option<ApiQuota> {
        self.quota
    }

    pub fn instantiate(&self) -> Box<dyn Checker> {
        (self.factory)()
    }
}

impl fmt::Debug for CheckerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerEntry")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

/// Every checker type known to the process, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<CheckerEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, C>(&mut self, factory: F) -> Result<(), CheckerError>
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: Checker + 'static,
    {
        let probe = factory();
        let id = probe.id().to_owned();

        if self.get(&id).is_some() {
            return Err(CheckerError::DuplicateChecker(id));
        }

        self.entries.push(CheckerEntry {
            display_name: probe.display_name().to_owned(),
            disabled: probe.is_disabled(),
            quota: probe.api_quota(),
            id,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Checker>),
        });

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&CheckerEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn entries(&self) -> &[CheckerEntry] {
        &self.entries
    }

    /// Entries that take part in cycles.
    pub fn active(&self) -> Vec<CheckerEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.disabled)
            .cloned()
            .collect()
    }

    /// Identities of all registered checkers, disabled ones included.
    pub fn ids(&self) -> HashSet<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
