//! Reqwest-based HTTP client for OData APIs.

use std::fmt;
use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tenantops_core::deadline::Deadline;
use tenantops_core::fetch::{Continuation, FetchPage, PagedFetcher};
use tenantops_core::retry::RetryPolicy;
use url::Url;

use crate::collection::{ODataCollection, ODataPage};
use crate::error::{Error, classify_status};
use crate::{ReqwestConfig, TRACING_TARGET};

/// Bearer token issued by the identity platform.
///
/// The token is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Inner client that holds the HTTP client and configuration.
#[derive(Clone)]
struct ReqwestClientInner {
    http: Client,
    config: ReqwestConfig,
    base_url: Url,
    token: Option<AccessToken>,
}

/// HTTP client for OData endpoints such as Microsoft Graph.
///
/// Cloning is cheap; clones share the connection pool. Relative paths are
/// resolved against [`ReqwestConfig::api_base_url`], absolute URLs (such as
/// `@odata.nextLink` values) are used as-is.
///
/// # Examples
///
/// ```rust,ignore
/// use tenantops_reqwest::{AccessToken, ReqwestClient, ReqwestConfig};
///
/// let client = ReqwestClient::new(ReqwestConfig::default())?
///     .with_access_token(AccessToken::new(token));
///
/// let user: serde_json::Value = client.get_json("users/adele@contoso.com").await?;
/// ```
#[derive(Clone)]
pub struct ReqwestClient {
    inner: Arc<ReqwestClientInner>,
}

impl fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestClient")
            .field("config", &self.inner.config)
            .field("authenticated", &self.inner.token.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestClient {
    /// Creates a new reqwest client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: ReqwestConfig) -> tenantops_core::Result<Self> {
        config.validate()?;

        let timeout = config.effective_timeout();
        let user_agent = config.effective_user_agent();
        let base_url = config.base_url().map_err(Error::from)?;

        tracing::debug!(
            target: TRACING_TARGET,
            base_url = %base_url,
            timeout_ms = timeout.as_millis(),
            "Creating reqwest client"
        );

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(&user_agent)
            .build()
            .map_err(|e| {
                tenantops_core::Error::configuration()
                    .with_message("failed to create HTTP client")
                    .with_source(e)
            })?;

        let inner = ReqwestClientInner {
            http,
            config,
            base_url,
            token: None,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Sends `token` as a bearer credential on every request.
    #[must_use]
    pub fn with_access_token(mut self, token: AccessToken) -> Self {
        Arc::make_mut(&mut self.inner).token = Some(token);
        self
    }

    /// Gets the client configuration.
    pub fn config(&self) -> &ReqwestConfig {
        &self.inner.config
    }

    /// Resolves `path` against the API root unless it is already absolute.
    pub fn resolve(&self, path: &str) -> tenantops_core::Result<Url> {
        let url = match Url::parse(path) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .inner
                .base_url
                .join(path.trim_start_matches('/'))
                .map_err(Error::from)?,
            Err(e) => return Err(Error::from(e).into()),
        };
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self
            .inner
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");

        match &self.inner.token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    /// Sends `request`, turning non-success statuses into classified errors.
    async fn send(&self, request: RequestBuilder) -> tenantops_core::Result<Response> {
        let response = request.send().await.map_err(Error::from)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(
                    target: TRACING_TARGET,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read error response body"
                );
                String::new()
            }
        };
        let error = classify_status(status, &headers, &body);

        tracing::debug!(
            target: TRACING_TARGET,
            status = status.as_u16(),
            error = %error,
            "Request failed"
        );

        Err(error)
    }

    /// Fetches `path` and deserializes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> tenantops_core::Result<T> {
        let url = self.resolve(path)?;
        tracing::trace!(target: TRACING_TARGET, url = %url, "GET");

        let response = self.send(self.request(Method::GET, url)).await?;
        let value = response.json().await.map_err(Error::from)?;
        Ok(value)
    }

    /// Issues a mutation against `path` with an optional JSON body.
    ///
    /// Returns the response body, or `None` for empty responses such as
    /// `204 No Content`.
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> tenantops_core::Result<Option<serde_json::Value>> {
        let url = self.resolve(path)?;
        tracing::trace!(target: TRACING_TARGET, method = %method, url = %url, "Sending request");

        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.send(request).await?;
        let text = response.text().await.map_err(Error::from)?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let value = serde_json::from_str(&text).map_err(Error::from)?;
        Ok(Some(value))
    }

    /// Fetches one page of the collection at `path`.
    ///
    /// Without a continuation the first page is requested (with `$top` when
    /// a page size is configured); otherwise the continuation link is
    /// followed verbatim.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        continuation: Option<Continuation>,
    ) -> tenantops_core::Result<FetchPage<T>> {
        let url = match continuation {
            Some(link) => self.resolve(link.as_str())?,
            None => {
                let mut url = self.resolve(path)?;
                if let Some(size) = self.inner.config.page_size {
                    url.query_pairs_mut().append_pair("$top", &size.to_string());
                }
                url
            }
        };

        tracing::trace!(target: TRACING_TARGET, url = %url, "Fetching page");

        let response = self.send(self.request(Method::GET, url)).await?;
        let page: ODataPage<T> = response.json().await.map_err(Error::from)?;
        Ok(page.into_page())
    }

    /// Returns a page source over the collection at `path`.
    pub fn collection<T>(&self, path: impl Into<String>) -> ODataCollection<T> {
        ODataCollection::new(self.clone(), path)
    }

    /// Returns a fetcher that retrieves the whole collection at `path`.
    pub fn list<T>(
        &self,
        path: impl Into<String>,
        policy: RetryPolicy,
        deadline: Deadline,
    ) -> PagedFetcher<ODataCollection<T>>
    where
        T: DeserializeOwned + Send,
    {
        PagedFetcher::new(self.collection(path), policy).with_deadline(deadline)
    }
}
