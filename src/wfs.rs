use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CancelToken, Envelope, SrsName};
use crate::error::HarvestError;

pub const WFS_VERSION: &str = "1.1.0";

/// IGN Géoplateforme: BD TOPO and RPG layers.
pub const GEOPF_SERVICE_URL: &str = "https://data.geopf.fr/wfs/ows";
/// Sandre BD Topage 2024 hydrography service.
pub const SANDRE_TOPAGE_SERVICE_URL: &str = "https://services.sandre.eaufrance.fr/geo/topage2024";

const GEOPF_PREFIXES: [&str; 2] = ["BDTOPO_V3:", "RPG."];

/// Endpoint for a type name that names none: Géoplateforme namespaces go to
/// data.geopf.fr, anything else to the Sandre Topage service.
pub fn default_service_url(type_name: &str) -> &'static str {
    let upper = type_name.trim().to_ascii_uppercase();
    if GEOPF_PREFIXES.iter().any(|prefix| upper.starts_with(prefix)) {
        GEOPF_SERVICE_URL
    } else {
        SANDRE_TOPAGE_SERVICE_URL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_ms: 700,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `backoff * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInfo {
    pub content_type: Option<String>,
}

pub type QueryParams = Vec<(&'static str, String)>;

/// Transport used by the probe and the fetcher. A non-success HTTP status is
/// reported as [`HarvestError::HttpStatus`] carrying the response body.
pub trait WfsClient: Send + Sync {
    fn fetch_document(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, HarvestError>;

    fn download(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<DownloadInfo, HarvestError>;
}

pub fn capabilities_params() -> QueryParams {
    vec![
        ("SERVICE", "WFS".to_string()),
        ("REQUEST", "GetCapabilities".to_string()),
    ]
}

#[derive(Debug, Clone)]
pub struct GetFeatureQuery<'a> {
    pub type_name: &'a str,
    pub srs: &'a SrsName,
    pub envelope: &'a Envelope,
    pub output_format: &'a str,
}

impl GetFeatureQuery<'_> {
    pub fn params(&self) -> QueryParams {
        vec![
            ("SERVICE", "WFS".to_string()),
            ("VERSION", WFS_VERSION.to_string()),
            ("REQUEST", "GetFeature".to_string()),
            ("TYPENAME", self.type_name.to_string()),
            ("SRSNAME", self.srs.to_string()),
            ("BBOX", self.envelope.bbox_param(self.srs)),
            ("OUTPUTFORMAT", self.output_format.to_string()),
        ]
    }
}

#[derive(Clone)]
pub struct WfsHttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl WfsHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("wfs-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self {
            client,
            retry: settings.retry,
        })
    }

    fn send_with_retries(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        cancel: &CancelToken,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            let response = self.client.get(service_url).query(params).send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.retry.max_retries && is_retryable_status(status) {
                        debug!(status, attempt, "retrying WFS request");
                        thread::sleep(self.retry.delay(attempt));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.retry.max_retries && is_retryable_error(&err) {
                        debug!(error = %err, attempt, "retrying WFS request");
                        thread::sleep(self.retry.delay(attempt));
                        attempt += 1;
                        continue;
                    }
                    return Err(HarvestError::Http(err.to_string()));
                }
            }
        }
    }
}

impl WfsClient for WfsHttpClient {
    fn fetch_document(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, HarvestError> {
        let response = self.send_with_retries(service_url, params, cancel)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "WFS request failed".to_string());
            return Err(HarvestError::HttpStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn download(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<DownloadInfo, HarvestError> {
        let mut response = self.send_with_retries(service_url, params, cancel)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "WFS request failed".to_string());
            return Err(HarvestError::HttpStatus { status, message });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut file =
            File::create(destination).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            cancel.check()?;
            let read = response
                .read(&mut chunk)
                .map_err(|err| HarvestError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&chunk[..read])
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        file.flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(DownloadInfo { content_type })
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
