use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::augment::{CLASSIFICATION_FIELD, set_classification_code};
use crate::capabilities::{CapabilitiesSnapshot, probe_capabilities};
use crate::config::ResolvedConfig;
use crate::dbf::TextEncoding;
use crate::domain::{CancelToken, Envelope, LayerRequest, SrsName};
use crate::envelope::envelope_from_path;
use crate::error::HarvestError;
use crate::fetcher::{FetchContext, fetch_layer_bundle};
use crate::negotiate::{
    FALLBACK_FORMATS, SubstringPolicy, negotiate_output_formats, resolve_type_names,
};
use crate::wfs::{WfsClient, default_service_url};

#[derive(Debug, Clone)]
pub struct ServiceParams {
    /// Endpoint for layers that name none. Unset means prefix routing.
    pub service_url: Option<String>,
    pub srs: SrsName,
    pub substring_policy: SubstringPolicy,
}

impl From<&ResolvedConfig> for ServiceParams {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            service_url: config.service_url.clone(),
            srs: config.srs.clone(),
            substring_policy: config.substring_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub envelope: Envelope,
    pub generated_at: String,
    pub layers: Vec<LayerSuccess>,
    pub skipped: Vec<LayerSkip>,
}

impl HarvestReport {
    pub fn success(&self, key: &str) -> Option<&LayerSuccess> {
        self.layers.iter().find(|layer| layer.key == key)
    }

    pub fn skip(&self, key: &str) -> Option<&LayerSkip> {
        self.skipped.iter().find(|layer| layer.key == key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSuccess {
    pub key: String,
    pub typename: String,
    pub code_lu: i64,
    pub service_url: String,
    pub shp_path: Utf8PathBuf,
    pub output_format: String,
    pub encoding: TextEncoding,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSkip {
    pub key: String,
    pub typename: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum LayerOutcome {
    Success(LayerSuccess),
    Skipped(LayerSkip),
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

struct LayerFailure {
    identifier: String,
    error: HarvestError,
}

pub struct App<C: WfsClient> {
    client: C,
    service: ServiceParams,
    cancel: CancelToken,
    capabilities: Mutex<HashMap<String, CapabilitiesSnapshot>>,
}

impl<C: WfsClient> App<C> {
    pub fn new(client: C, service: ServiceParams) -> Self {
        Self {
            client,
            service,
            cancel: CancelToken::new(),
            capabilities: Mutex::new(HashMap::new()),
        }
    }

    /// Token that aborts in-flight and pending layer fetches when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn envelope(&self, input: &Path, buffer: f64) -> Result<Envelope, HarvestError> {
        envelope_from_path(input, buffer, &self.service.srs)
    }

    /// Envelope from `input`, then every layer of `requests` under `out_dir`.
    pub fn harvest(
        &self,
        input: &Path,
        buffer: f64,
        requests: &[LayerRequest],
        out_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestReport, HarvestError> {
        sink.event(ProgressEvent {
            message: format!("phase=Envelope; reading {}", input.display()),
            elapsed: None,
        });
        let envelope = self.envelope(input, buffer)?;
        self.run_batch(requests, &envelope, out_dir, sink)
    }

    /// Runs every layer independently. Only precondition violations (duplicate
    /// keys or output directories) fail the batch; per-layer errors become
    /// skipped entries.
    pub fn run_batch(
        &self,
        requests: &[LayerRequest],
        envelope: &Envelope,
        out_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestReport, HarvestError> {
        validate_layer_dirs(requests)?;
        fs::create_dir_all(out_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let mut layers = Vec::new();
        let mut skipped = Vec::new();
        for request in requests {
            let layer_dir = out_dir.join(request.dir_name());
            match self.run_layer(request, envelope, &layer_dir, sink) {
                LayerOutcome::Success(success) => layers.push(success),
                LayerOutcome::Skipped(skip) => skipped.push(skip),
            }
        }

        info!(
            succeeded = layers.len(),
            skipped = skipped.len(),
            "batch finished"
        );
        Ok(HarvestReport {
            envelope: *envelope,
            generated_at: iso_timestamp(),
            layers,
            skipped,
        })
    }

    /// Single-layer run: the terminal error is returned instead of recorded.
    pub fn fetch_layer(
        &self,
        request: &LayerRequest,
        envelope: &Envelope,
        layer_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<LayerSuccess, HarvestError> {
        self.try_layer(request, envelope, layer_dir, sink)
            .map_err(|failure| failure.error)
    }

    fn run_layer(
        &self,
        request: &LayerRequest,
        envelope: &Envelope,
        layer_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> LayerOutcome {
        let start = Instant::now();
        match self.try_layer(request, envelope, layer_dir, sink) {
            Ok(success) => {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Done; {} -> {}",
                        request.logical_key, success.typename
                    ),
                    elapsed: Some(start.elapsed()),
                });
                LayerOutcome::Success(success)
            }
            Err(failure) => {
                warn!(
                    key = %request.logical_key,
                    typename = %failure.identifier,
                    error = %failure.error,
                    "layer skipped"
                );
                sink.event(ProgressEvent {
                    message: format!("phase=Skip; {}: {}", request.logical_key, failure.error),
                    elapsed: Some(start.elapsed()),
                });
                LayerOutcome::Skipped(LayerSkip {
                    key: request.logical_key.clone(),
                    typename: failure.identifier,
                    reason: failure.error.to_string(),
                })
            }
        }
    }

    fn try_layer(
        &self,
        request: &LayerRequest,
        envelope: &Envelope,
        layer_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<LayerSuccess, LayerFailure> {
        let fail = |identifier: &str| {
            let identifier = identifier.to_string();
            move |error: HarvestError| LayerFailure { identifier, error }
        };
        let desired = request.desired_identifier.as_str();
        self.cancel.check().map_err(fail(desired))?;

        let service_url = self.service_url_for(request);
        sink.event(ProgressEvent {
            message: format!("phase=Probe; {service_url}"),
            elapsed: None,
        });
        let capabilities = self.capabilities_for(&service_url);
        let type_names = resolve_type_names(
            desired,
            &capabilities.type_names,
            self.service.substring_policy,
        )
        .map_err(fail(desired))?;
        let formats = negotiate_output_formats(&capabilities.output_formats, &FALLBACK_FORMATS);

        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; {} ({} type names x {} formats)",
                request.logical_key,
                type_names.len(),
                formats.len()
            ),
            elapsed: None,
        });
        let ctx = FetchContext {
            service_url: &service_url,
            srs: &self.service.srs,
            envelope,
            cancel: &self.cancel,
        };
        let fetched = fetch_layer_bundle(
            &self.client,
            &ctx,
            &type_names,
            &formats,
            layer_dir.as_std_path(),
        )
        .map_err(fail(desired))?;

        let resolved = fetched.type_name.as_str();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Augment; {CLASSIFICATION_FIELD} = {}",
                request.classification_code
            ),
            elapsed: None,
        });
        let summary = set_classification_code(&fetched.shp_path, request.classification_code)
            .map_err(fail(resolved))?;
        let shp_path = Utf8PathBuf::from_path_buf(fetched.shp_path.clone())
            .map_err(|_| HarvestError::Filesystem("non-utf8 file path in bundle".to_string()))
            .map_err(fail(resolved))?;

        info!(
            key = %request.logical_key,
            typename = resolved,
            format = %fetched.output_format,
            records = summary.records,
            service_url = %service_url,
            "layer ready"
        );
        Ok(LayerSuccess {
            key: request.logical_key.clone(),
            typename: fetched.type_name.clone(),
            code_lu: request.classification_code,
            service_url,
            shp_path,
            output_format: fetched.output_format.clone(),
            encoding: summary.encoding,
            records: summary.records,
        })
    }

    /// Layer endpoint, then the configured endpoint, then prefix routing.
    fn service_url_for(&self, request: &LayerRequest) -> String {
        request
            .service_url
            .as_deref()
            .or(self.service.service_url.as_deref())
            .unwrap_or_else(|| default_service_url(&request.desired_identifier))
            .to_string()
    }

    /// Probes each endpoint once per `App`; failed probes are cached as empty.
    fn capabilities_for(&self, service_url: &str) -> CapabilitiesSnapshot {
        if let Ok(cache) = self.capabilities.lock() {
            if let Some(snapshot) = cache.get(service_url) {
                return snapshot.clone();
            }
        }
        let snapshot = probe_capabilities(&self.client, service_url, &self.cancel);
        if self.cancel.is_cancelled() {
            return snapshot;
        }
        if let Ok(mut cache) = self.capabilities.lock() {
            cache.insert(service_url.to_string(), snapshot.clone());
        }
        snapshot
    }
}

/// Every layer needs its own output directory; the directory name is the
/// lower-cased logical key.
pub fn validate_layer_dirs(requests: &[LayerRequest]) -> Result<(), HarvestError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for request in requests {
        let dir = request.dir_name();
        if dir.is_empty()
            || dir == "."
            || dir == ".."
            || dir.contains(['/', '\\'])
        {
            return Err(HarvestError::InvalidInput(format!(
                "layer key {:?} cannot be used as a directory name",
                request.logical_key
            )));
        }
        if let Some(first) = seen.insert(dir.clone(), &request.logical_key) {
            return Err(HarvestError::DuplicateOutputDir {
                first: first.to_string(),
                second: request.logical_key.clone(),
                dir,
            });
        }
    }
    Ok(())
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
