//! OpenStack Swift object storage over its HTTP API.
//!
//! Authenticates against Keystone v3 once, then talks to the public
//! `object-store` endpoint from the service catalog with the issued token.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use super::local::name_matcher;
use super::{FileKind, ListFilter, RemoteStore};
use crate::address::{ObjectPath, basename};
use crate::error::TransferError;
use crate::events::{EventSink, TracingSink, TransferEvent};
use crate::retry::{self, Attempts};
use crate::stream::CountingWriter;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
/// Swift's default page size for container and object listings.
const LISTING_PAGE: usize = 10_000;
const UPLOAD_CHUNK: usize = 64 * 1024;
const UPLOAD_QUEUE: usize = 4;

/// Swift connection settings, every field optional until validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwiftSettings {
    pub user: Option<String>,
    pub key: Option<String>,
    pub auth_url: Option<String>,
    pub tenant: Option<String>,
    pub domain: Option<String>,
}

impl SwiftSettings {
    pub const ENV_USER: &'static str = "SWIFT_API_USER";
    pub const ENV_KEY: &'static str = "SWIFT_API_KEY";
    pub const ENV_AUTH_URL: &'static str = "SWIFT_AUTH_URL";
    pub const ENV_TENANT: &'static str = "SWIFT_TENANT";
    pub const ENV_DOMAIN: &'static str = "SWIFT_API_DOMAIN";

    /// Read the `SWIFT_*` environment variables. Empty values count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            user: var(Self::ENV_USER),
            key: var(Self::ENV_KEY),
            auth_url: var(Self::ENV_AUTH_URL),
            tenant: var(Self::ENV_TENANT),
            domain: var(Self::ENV_DOMAIN),
        }
    }

    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: SwiftSettings) -> Self {
        Self {
            user: self.user.or(fallback.user),
            key: self.key.or(fallback.key),
            auth_url: self.auth_url.or(fallback.auth_url),
            tenant: self.tenant.or(fallback.tenant),
            domain: self.domain.or(fallback.domain),
        }
    }

    /// Require every field. The error names the first missing variable.
    pub fn into_credentials(self) -> Result<SwiftCredentials, TransferError> {
        fn require(value: Option<String>, name: &str) -> Result<String, TransferError> {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TransferError::config(format!("Missing {name}")))
        }

        Ok(SwiftCredentials {
            user: require(self.user, Self::ENV_USER)?,
            key: require(self.key, Self::ENV_KEY)?,
            auth_url: require(self.auth_url, Self::ENV_AUTH_URL)?,
            tenant: require(self.tenant, Self::ENV_TENANT)?,
            domain: require(self.domain, Self::ENV_DOMAIN)?,
        })
    }
}

/// Validated Swift credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct SwiftCredentials {
    pub user: String,
    pub key: String,
    pub auth_url: String,
    pub tenant: String,
    pub domain: String,
}

impl SwiftCredentials {
    /// Keystone v3 token endpoint derived from `auth_url`.
    pub fn token_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        if base.ends_with("/v3") {
            format!("{base}/auth/tokens")
        } else {
            format!("{base}/v3/auth/tokens")
        }
    }

    fn password_auth_body(&self) -> serde_json::Value {
        serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.user,
                            "domain": { "name": self.domain },
                            "password": self.key,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.tenant,
                        "domain": { "name": self.domain },
                    }
                }
            }
        })
    }
}

impl fmt::Debug for SwiftCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwiftCredentials")
            .field("user", &self.user)
            .field("key", &"<redacted>")
            .field("auth_url", &self.auth_url)
            .field("tenant", &self.tenant)
            .field("domain", &self.domain)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
}

/// Object-store adapter for one authenticated Swift account.
pub struct SwiftStore {
    http: reqwest::Client,
    storage_url: Url,
    token: String,
    events: Arc<dyn EventSink>,
}

impl SwiftStore {
    /// Authenticate and check that `bucket` exists in the account.
    pub async fn connect(credentials: &SwiftCredentials, bucket: &str) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ferry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransferError::config(format!("failed to build HTTP client: {e}")))?;

        let (token, storage_url) = authenticate(&http, credentials).await?;
        let store = Self::with_token(http, storage_url, token);

        let containers = store
            .list_names(store.storage_url.clone(), None)
            .await
            .map_err(|e| {
                TransferError::config(format!("Can't fetch container list for container check: {e}"))
            })?;
        if !containers.iter().any(|name| name == bucket) {
            return Err(TransferError::config(format!(
                "Swift storage container doesn't exist: {bucket}"
            )));
        }

        tracing::debug!(bucket, storage_url = %store.storage_url, "connected to swift");
        Ok(store)
    }

    /// Use an already issued token and storage URL.
    pub fn with_token(http: reqwest::Client, storage_url: Url, token: String) -> Self {
        Self {
            http,
            storage_url,
            token,
            events: Arc::new(TracingSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    fn container_url(&self, bucket: &str) -> Result<Url, TransferError> {
        let mut url = self.storage_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransferError::config("swift storage URL cannot hold a path"))?
            .pop_if_empty()
            .push(bucket);
        Ok(url)
    }

    fn object_url(&self, path: &ObjectPath) -> Result<Url, TransferError> {
        let mut url = self.container_url(&path.bucket)?;
        url.path_segments_mut()
            .map_err(|_| TransferError::config("swift storage URL cannot hold a path"))?
            .extend(path.key.split('/'));
        Ok(url)
    }

    /// Names from a paginated JSON listing of an account or container.
    async fn list_names(&self, url: Url, prefix: Option<&str>) -> Result<Vec<String>, TransferError> {
        let mut names: Vec<String> = Vec::new();
        loop {
            let mut query: Vec<(&str, &str)> = vec![("format", "json")];
            if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
                query.push(("prefix", prefix));
            }
            if let Some(marker) = names.last() {
                query.push(("marker", marker.as_str()));
            }

            let response = self
                .http
                .get(url.clone())
                .header(AUTH_TOKEN_HEADER, &self.token)
                .query(&query)
                .send()
                .await
                .map_err(request_error)?;
            let response = check_status(response, "list").await?;
            let page: Vec<ListingEntry> = if response.status() == StatusCode::NO_CONTENT {
                Vec::new()
            } else {
                response.json().await.map_err(request_error)?
            };

            let full = page.len() >= LISTING_PAGE;
            names.extend(page.into_iter().map(|entry| entry.name));
            if !full {
                return Ok(names);
            }
        }
    }

    async fn download(&self, url: Url, sink: &mut CountingWriter<'_>) -> Result<(), TransferError> {
        let response = self
            .http
            .get(url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response, "download").await?;

        let body = response.bytes_stream().map_err(io::Error::other);
        let mut reader = StreamReader::new(Box::pin(body));
        tokio::io::copy(&mut reader, sink)
            .await
            .map_err(|e| TransferError::ObjectStore {
                message: format!("download interrupted: {e}"),
                retryable: true,
            })?;
        sink.flush()
            .await
            .map_err(|e| TransferError::io("failed to flush download sink", e))
    }

    async fn delete(&self, url: &Url) -> Result<(), TransferError> {
        let response = self
            .http
            .delete(url.clone())
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response, "delete").await.map(|_| ())
    }

    /// Run `op` under the shared retry policy.
    async fn retrying<T, F, Fut>(&self, address: &str, mut op: F) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, TransferError>> + Send,
        T: Send,
    {
        let mut attempts = Attempts::new();
        loop {
            attempts.start();
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempts.is_final() => return Err(err),
                Err(err) => self.backoff(address, &attempts, &err).await,
            }
        }
    }

    async fn backoff(&self, address: &str, attempts: &Attempts, err: &TransferError) {
        let attempt = attempts.current();
        self.events.emit(TransferEvent::RetryScheduled {
            address: address.to_string(),
            attempt,
            delay: retry::backoff_delay(attempt),
            reason: err.to_string(),
        });
        retry::sleep(attempt).await;
    }
}

#[async_trait]
impl RemoteStore for SwiftStore {
    fn name(&self) -> &str {
        "swift"
    }

    /// Objects below the address whose basename matches the pattern.
    ///
    /// Swift has no directories, so listing [`FileKind::Directory`] is empty.
    async fn list(&self, address: &str, filter: &ListFilter) -> Result<Vec<String>, TransferError> {
        let path = ObjectPath::parse(address)?;
        if filter.kind == FileKind::Directory {
            return Ok(Vec::new());
        }
        let matcher = name_matcher(&filter.name_pattern)?;
        let prefix = if path.is_bucket_only() {
            String::new()
        } else {
            format!("{}/", path.key)
        };
        let url = self.container_url(&path.bucket)?;

        let names = self
            .retrying(address, || self.list_names(url.clone(), Some(prefix.as_str())))
            .await?;
        Ok(names
            .into_iter()
            .filter(|name| matcher.is_match(basename(name)))
            .map(|name| format!("/{}", &name[prefix.len()..]))
            .collect())
    }

    async fn read(
        &self,
        address: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransferError> {
        let path = ObjectPath::parse(address)?;
        if path.is_bucket_only() {
            return Err(TransferError::bad_address(address));
        }
        let url = self.object_url(&path)?;

        let mut sink = CountingWriter::new(sink);
        let mut attempts = Attempts::new();
        loop {
            attempts.start();
            match self.download(url.clone(), &mut sink).await {
                Ok(()) => return Ok(()),
                Err(err) if sink.written() > 0 || !err.is_retryable() || attempts.is_final() => {
                    return Err(err);
                }
                Err(err) => self.backoff(address, &attempts, &err).await,
            }
        }
    }

    /// Upload `source` in one streaming PUT. Not retried: the source has
    /// been consumed by the time the server answers.
    async fn write(
        &self,
        address: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        source_name: Option<&str>,
    ) -> Result<(), TransferError> {
        let path = ObjectPath::parse_for_write(address, source_name)?;
        if path.is_bucket_only() {
            return Err(TransferError::bad_address(address));
        }
        let url = self.object_url(&path)?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(UPLOAD_QUEUE);
        let request = self
            .http
            .put(url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)))
            .send();

        let feed = async move {
            let mut buf = vec![0u8; UPLOAD_CHUNK];
            loop {
                let n = match source.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        // Abort the request instead of committing a truncated object.
                        let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                        return Err(TransferError::io("failed to read upload source", e));
                    }
                };
                if n == 0 {
                    return Ok(());
                }
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return Ok(());
                }
            }
        };

        let (fed, response) = tokio::join!(feed, request);
        fed?;
        let response = response.map_err(request_error)?;
        check_status(response, "upload").await?;
        tracing::debug!(bucket = %path.bucket, key = %path.key, "uploaded object");
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), TransferError> {
        let path = ObjectPath::parse(address)?;
        if path.is_bucket_only() {
            return Err(TransferError::bad_address(address));
        }
        let url = self.object_url(&path)?;
        self.retrying(address, || self.delete(&url)).await
    }
}

async fn authenticate(
    http: &reqwest::Client,
    credentials: &SwiftCredentials,
) -> Result<(String, Url), TransferError> {
    let auth_failed =
        |detail: String| TransferError::config(format!("Authentication failed with the Swift client: {detail}"));

    let response = http
        .post(credentials.token_url())
        .json(&credentials.password_auth_body())
        .send()
        .await
        .map_err(|e| auth_failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(auth_failed(format!("status {}", response.status())));
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| auth_failed(format!("missing {SUBJECT_TOKEN_HEADER} header")))?;
    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| auth_failed(format!("unreadable token response: {e}")))?;

    let endpoint = object_store_endpoint(body.token.catalog)
        .ok_or_else(|| auth_failed("no public object-store endpoint in catalog".to_string()))?;
    let storage_url = Url::parse(&endpoint)
        .map_err(|e| auth_failed(format!("invalid object-store endpoint {endpoint:?}: {e}")))?;
    Ok((token, storage_url))
}

fn object_store_endpoint(catalog: Vec<CatalogEntry>) -> Option<String> {
    catalog
        .into_iter()
        .filter(|entry| entry.kind == "object-store")
        .flat_map(|entry| entry.endpoints)
        .find(|endpoint| endpoint.interface == "public")
        .map(|endpoint| endpoint.url)
}

async fn check_status(response: Response, operation: &str) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransferError::ObjectStore {
        message: format!("{operation} failed with {status}: {}", body.trim()),
        retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
    })
}

fn request_error(err: reqwest::Error) -> TransferError {
    TransferError::ObjectStore {
        retryable: err.is_connect() || err.is_timeout() || err.is_request(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_settings() -> SwiftSettings {
        SwiftSettings {
            user: Some("backup".to_string()),
            key: Some("k3y".to_string()),
            auth_url: Some("https://keystone.example:5000/v3".to_string()),
            tenant: Some("ops".to_string()),
            domain: Some("Default".to_string()),
        }
    }

    #[test]
    fn missing_setting_names_env_var() {
        let mut settings = full_settings();
        settings.tenant = None;
        let err = settings.into_credentials().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: Missing SWIFT_TENANT");

        let err = SwiftSettings::default().into_credentials().unwrap_err();
        assert!(err.to_string().contains("SWIFT_API_USER"), "{err}");
    }

    #[test]
    fn empty_setting_counts_as_missing() {
        let mut settings = full_settings();
        settings.key = Some(String::new());
        let err = settings.into_credentials().unwrap_err();
        assert!(err.to_string().contains("SWIFT_API_KEY"), "{err}");
    }

    #[test]
    fn settings_fall_back_field_by_field() {
        let env = SwiftSettings {
            user: Some("from-env".to_string()),
            ..Default::default()
        };
        let merged = env.or(full_settings());
        assert_eq!(merged.user.as_deref(), Some("from-env"));
        assert_eq!(merged.tenant.as_deref(), Some("ops"));
    }

    #[test]
    fn token_url_handles_version_suffix() {
        let creds = full_settings().into_credentials().unwrap();
        assert_eq!(creds.token_url(), "https://keystone.example:5000/v3/auth/tokens");

        let mut creds = creds;
        creds.auth_url = "https://keystone.example:5000/".to_string();
        assert_eq!(creds.token_url(), "https://keystone.example:5000/v3/auth/tokens");
    }

    #[test]
    fn debug_redacts_key() {
        let creds = full_settings().into_credentials().unwrap();
        assert!(!format!("{creds:?}").contains("k3y"));
    }

    #[test]
    fn picks_public_object_store_endpoint() {
        let body: TokenResponse = serde_json::from_value(serde_json::json!({
            "token": {
                "catalog": [
                    { "type": "identity", "endpoints": [
                        { "interface": "public", "url": "https://keystone.example/v3" }
                    ]},
                    { "type": "object-store", "endpoints": [
                        { "interface": "internal", "url": "http://10.0.0.5:8080/v1/AUTH_ops" },
                        { "interface": "public", "url": "https://swift.example/v1/AUTH_ops" }
                    ]}
                ]
            }
        }))
        .unwrap();
        assert_eq!(
            object_store_endpoint(body.token.catalog).as_deref(),
            Some("https://swift.example/v1/AUTH_ops")
        );
    }

    #[test]
    fn object_urls_escape_segments() {
        let store = SwiftStore::with_token(
            reqwest::Client::new(),
            Url::parse("https://swift.example/v1/AUTH_ops").unwrap(),
            "t".to_string(),
        );
        let path = ObjectPath::parse("backups/daily/db dump.tgz").unwrap();
        assert_eq!(
            store.object_url(&path).unwrap().as_str(),
            "https://swift.example/v1/AUTH_ops/backups/daily/db%20dump.tgz"
        );
    }
}
