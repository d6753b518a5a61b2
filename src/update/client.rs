//! HTTP access to the update server.
//!
//! [`Fetch`] is the transport seam: [`HttpClient`] implements it with a
//! blocking `reqwest` client and per-phase timeouts, and tests substitute a
//! scripted transport. [`ManifestClient`] builds the endpoint URLs and
//! interprets the version and file-list responses.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use reqwest::Url;
use std::io::Read;
use std::time::Instant;

use super::manifest::{FileEntry, FilesResponse, VersionResponse};
use super::version::{compare_versions, UpdateCheck};
use crate::config::{HttpTimeouts, ServerConfig};
use crate::error::UpdateError;

/// Header carrying the static API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Default cap on a single response body (50 MB).
pub const MAX_DOWNLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// Cap on metadata (JSON) responses.
pub const MAX_METADATA_SIZE: u64 = 4 * 1024 * 1024;

/// Which timeout profile a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Metadata,
    Download,
}

/// Status and body of a completed request.
///
/// The body is only read for 2xx responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn reason(&self) -> String {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown error")
            .to_string()
    }
}

/// Perform one authenticated GET.
///
/// Only transport failures are errors; any HTTP status is returned.
pub trait Fetch {
    fn get(&self, url: &str, kind: RequestKind) -> Result<FetchResponse, UpdateError>;
}

/// Blocking `reqwest` transport with separate metadata and download clients.
pub struct HttpClient {
    metadata: Client,
    download: Client,
    api_key: String,
    max_download_size: u64,
}

impl HttpClient {
    pub fn new(
        api_key: impl Into<String>,
        metadata_timeouts: HttpTimeouts,
        download_timeouts: HttpTimeouts,
        max_download_size: u64,
    ) -> Result<Self, UpdateError> {
        Ok(Self {
            metadata: build_client(metadata_timeouts)?,
            download: build_client(download_timeouts)?,
            api_key: api_key.into(),
            max_download_size,
        })
    }
}

/// Client with bounded connect and total request time, so a dead server
/// can never hang the caller.
fn build_client(timeouts: HttpTimeouts) -> Result<Client, UpdateError> {
    Client::builder()
        .connect_timeout(timeouts.connect())
        .timeout(timeouts.total())
        .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| UpdateError::Network {
            context: "Failed to create HTTP client".to_string(),
            message: e.to_string(),
        })
}

impl Fetch for HttpClient {
    fn get(&self, url: &str, kind: RequestKind) -> Result<FetchResponse, UpdateError> {
        let (client, limit) = match kind {
            RequestKind::Metadata => (&self.metadata, MAX_METADATA_SIZE),
            RequestKind::Download => (&self.download, self.max_download_size),
        };

        let started = Instant::now();
        let response = client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .map_err(|e| UpdateError::Network {
                context: format!("Request to {url} failed"),
                message: describe_reqwest_error(&e),
            })?;

        let status = response.status().as_u16();
        tracing::debug!(
            url,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http response"
        );

        if !response.status().is_success() {
            return Ok(FetchResponse {
                status,
                body: Vec::new(),
            });
        }

        let body = download_with_limit(response, limit, url)?;
        Ok(FetchResponse { status, body })
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out ({e})")
    } else if e.is_connect() {
        format!("could not connect ({e})")
    } else {
        e.to_string()
    }
}

/// Read a response body, enforcing `max_size`.
///
/// Checks Content-Length first, then enforces the limit while streaming.
pub(crate) fn download_with_limit(
    response: Response,
    max_size: u64,
    context: &str,
) -> Result<Vec<u8>, UpdateError> {
    if let Some(content_length) = response.content_length() {
        if content_length > max_size {
            return Err(UpdateError::TooLarge {
                context: format!("{context}: Content-Length {content_length} bytes"),
                limit: max_size,
            });
        }
    }
    read_limited(response, max_size, context)
}

pub(crate) fn read_limited<R: Read>(
    mut reader: R,
    max_size: u64,
    context: &str,
) -> Result<Vec<u8>, UpdateError> {
    let mut bytes = Vec::new();
    let mut total_read: u64 = 0;
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| UpdateError::io(format!("{context}: failed to read response body"), e))?;
        if n == 0 {
            break;
        }
        total_read += n as u64;
        if total_read > max_size {
            return Err(UpdateError::TooLarge {
                context: context.to_string(),
                limit: max_size,
            });
        }
        bytes.extend_from_slice(&buffer[..n]);
    }

    Ok(bytes)
}

/// Talks to the version, file-list and download endpoints of one app.
pub struct ManifestClient<F> {
    base_url: String,
    app: String,
    fetch: F,
}

impl ManifestClient<HttpClient> {
    pub fn from_config(
        server: &ServerConfig,
        metadata_timeouts: HttpTimeouts,
        download_timeouts: HttpTimeouts,
        max_download_size: u64,
    ) -> Result<Self, UpdateError> {
        let http = HttpClient::new(
            server.api_key.clone(),
            metadata_timeouts,
            download_timeouts,
            max_download_size,
        )?;
        Ok(Self::new(&server.base_url, &server.app, http))
    }
}

impl<F: Fetch> ManifestClient<F> {
    pub fn new(base_url: &str, app: &str, fetch: F) -> Self {
        Self {
            base_url: base_url.to_string(),
            app: app.to_string(),
            fetch,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetch
    }

    /// Ask the server for the newest version and compare it with `current`.
    pub fn check_latest_version(&self, current: &str) -> Result<UpdateCheck, UpdateError> {
        let url = self.endpoint(&["api", "versions", &self.app])?;
        let response = self.fetch.get(&url, RequestKind::Metadata)?;
        ensure_success(&response, "Failed to fetch version info")?;

        let info: VersionResponse = serde_json::from_slice(&response.body)
            .map_err(|e| UpdateError::InvalidResponse(format!("version info: {e}")))?;
        if info.latest_version.trim().is_empty() {
            return Err(UpdateError::InvalidResponse(
                "version info has no latest_version".to_string(),
            ));
        }

        let status = compare_versions(&info.latest_version, current).into();
        Ok(UpdateCheck {
            current_version: current.to_string(),
            latest_version: info.latest_version,
            status,
            release: info.version_info,
        })
    }

    /// File list of `version`. A 404 means the server does not know it.
    pub fn file_manifest(&self, version: &str) -> Result<Vec<FileEntry>, UpdateError> {
        let url = self.endpoint(&["api", "files", &self.app, version])?;
        let response = self.fetch.get(&url, RequestKind::Metadata)?;
        if response.status == 404 {
            return Err(UpdateError::VersionNotFound {
                version: version.to_string(),
            });
        }
        ensure_success(&response, "Failed to fetch file list")?;

        let files: FilesResponse = serde_json::from_slice(&response.body)
            .map_err(|e| UpdateError::InvalidResponse(format!("file list: {e}")))?;
        Ok(files.files)
    }

    /// Download URL for one file (or the release itself when `relative_path` is `None`).
    pub fn download_url(
        &self,
        version: &str,
        relative_path: Option<&str>,
    ) -> Result<String, UpdateError> {
        let mut segments = vec!["api", "download", self.app.as_str(), version];
        if let Some(path) = relative_path {
            segments.extend(path.split(['/', '\\']).filter(|s| !s.is_empty()));
        }
        self.endpoint(&segments)
    }

    /// Fetch raw bytes from the download endpoint.
    pub fn download(&self, url: &str) -> Result<FetchResponse, UpdateError> {
        self.fetch.get(url, RequestKind::Download)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<String, UpdateError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|_| UpdateError::InvalidUrl(self.base_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| UpdateError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }
}

/// Turn a non-success status into an error carrying the code.
pub(crate) fn ensure_success(response: &FetchResponse, context: &str) -> Result<(), UpdateError> {
    if response.is_success() {
        return Ok(());
    }
    Err(UpdateError::Http {
        context: context.to_string(),
        status: response.status,
        reason: response.reason(),
    })
}
