use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Identifies one cached response: the URL plus its query parameters,
/// independent of the order the parameters were supplied in. Repeated
/// parameter names are all kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new<K, V>(url: impl Into<String>, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        params.sort();

        Self {
            url: url.into(),
            params,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Response bodies shared between checkers for the duration of one cycle.
#[derive(Debug, Default)]
pub struct RequestCache {
    pages: Mutex<HashMap<CacheKey, String>>,
    gates: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, key: &CacheKey) -> Option<String> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn save(&self, key: CacheKey, body: String) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, body);
    }

    pub fn clear(&self) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Return the cached body for `key`, or run `fetch` and cache its result.
    ///
    /// Callers racing on the same key are serialized so only one of them
    /// performs the fetch; the others observe the cached body. Distinct keys
    /// never wait on each other, and the map locks are never held across
    /// `fetch`. Failed fetches are not cached.
    pub async fn read_or_fetch<F, Fut, E>(&self, key: CacheKey, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let gate = self.gate(&key);
        let _guard = gate.lock().await;

        if let Some(body) = self.read(&key) {
            tracing::debug!("Request cache hit for {}", key.url());
            return Ok(body);
        }

        let body = fetch().await?;
        self.save(key, body.clone());

        Ok(body)
    }

    fn gate(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }
}
