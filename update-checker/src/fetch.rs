use crate::cache::{CacheKey, RequestCache};
use crate::error::{CheckError, CheckerError};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Process-wide HTTP client with the configured proxy and default timeout.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Prepare the HTTP client.
    pub fn new(timeout: Duration, proxy: Option<&Url>) -> Result<Self, CheckerError> {
        // Environment proxies are ignored, only the configured one is used.
        let mut builder = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .redirect(Policy::limited(10))
            .hickory_dns(true)
            .no_proxy();

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
            timeout,
        })
    }

    /// Issue a plain GET, failing on transport errors and error statuses.
    #[tracing::instrument(skip(self))]
    pub async fn probe(&self, url: &str) -> Result<(), CheckError> {
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn send(&self, request: FetchRequest) -> Result<String, CheckError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .timeout(request.timeout.unwrap_or(self.timeout));

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }

        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// One outgoing request as described by a source adapter.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Result<Self, CheckError> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self, CheckError> {
        Self::new(Method::POST, url)
    }

    fn new(method: Method, url: &str) -> Result<Self, CheckError> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            params: Vec::new(),
            headers: Vec::new(),
            timeout: None,
        })
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.url.as_str(), self.params.iter().cloned())
    }
}

/// The fetch primitive handed to a checker for one run.
///
/// Whether responses go through the request cache is decided once per run
/// from the checker's type, never per request.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: HttpClient,
    cache: Option<Arc<RequestCache>>,
}

impl Fetcher {
    pub fn new(http: HttpClient, cache: Option<Arc<RequestCache>>) -> Self {
        Self { http, cache }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    #[tracing::instrument(skip_all, fields(url = request.url.as_str(), method = request.method.as_str()))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<String, CheckError> {
        match &self.cache {
            Some(cache) if request.method == Method::GET => {
                let key = request.cache_key();
                cache.read_or_fetch(key, || self.http.send(request)).await
            }
            _ => self.http.send(request).await,
        }
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, request: FetchRequest) -> Result<T, CheckError> {
        let body = self.fetch(request).await?;
        serde_json::from_str(&body).map_err(CheckError::from)
    }

    /// Fetch a checksum file and return its first token.
    ///
    /// Any failure yields `None`; a missing checksum never fails a check.
    pub async fn fetch_hash_file(&self, url: &str) -> Option<String> {
        let request = FetchRequest::get(url).ok()?;

        match self.fetch(request).await {
            Ok(body) => first_token(&body),
            Err(err) => {
                tracing::debug!("Ignoring unavailable hash file {}: {}", url, err);
                None
            }
        }
    }
}

fn first_token(body: &str) -> Option<String> {
    body.split_whitespace().next().map(ToOwned::to_owned)
}
