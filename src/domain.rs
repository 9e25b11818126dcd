use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Axis-aligned bounding rectangle in a planar CRS (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl Envelope {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self, HarvestError> {
        let finite = [xmin, ymin, xmax, ymax].iter().all(|v| v.is_finite());
        if !finite || xmin > xmax || ymin > ymax {
            return Err(HarvestError::InvalidInput(format!(
                "degenerate envelope [{xmin}, {ymin}, {xmax}, {ymax}]"
            )));
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    pub fn buffered(&self, buffer: f64) -> Result<Self, HarvestError> {
        if !buffer.is_finite() || buffer < 0.0 {
            return Err(HarvestError::InvalidInput(format!(
                "buffer must be a non-negative number, got {buffer}"
            )));
        }
        Self::new(
            self.xmin - buffer,
            self.ymin - buffer,
            self.xmax + buffer,
            self.ymax + buffer,
        )
    }

    /// WFS 1.1.0 `BBOX` value with the CRS suffix.
    pub fn bbox_param(&self, srs: &SrsName) -> String {
        format!(
            "{},{},{},{},{}",
            self.xmin, self.ymin, self.xmax, self.ymax, srs
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SrsName(String);

impl SrsName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EPSG code for the common spellings: `EPSG:2154`, `urn:ogc:def:crs:EPSG::2154`,
    /// `http://www.opengis.net/def/crs/EPSG/0/2154`.
    pub fn epsg_code(&self) -> Option<u32> {
        epsg_code(&self.0)
    }

    pub fn matches(&self, declared: &str) -> bool {
        match (self.epsg_code(), epsg_code(declared)) {
            (Some(expected), Some(found)) => expected == found,
            _ => self.0.trim().eq_ignore_ascii_case(declared.trim()),
        }
    }
}

impl Default for SrsName {
    fn default() -> Self {
        Self("EPSG:2154".to_string())
    }
}

impl fmt::Display for SrsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SrsName {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.contains(',') {
            return Err(HarvestError::InvalidInput(format!("invalid SRS name: {value}")));
        }
        Ok(Self(trimmed.to_string()))
    }
}

fn epsg_code(value: &str) -> Option<u32> {
    static EPSG_RE: OnceLock<Regex> = OnceLock::new();
    let re = EPSG_RE.get_or_init(|| {
        Regex::new(r"(?i)epsg(?:::?|/0/|/)(\d+)$").expect("valid EPSG regex")
    });
    re.captures(value.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

/// One layer the caller wants fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRequest {
    pub logical_key: String,
    pub desired_identifier: String,
    pub classification_code: i64,
    /// WFS endpoint serving this layer; routed by type-name prefix when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

impl LayerRequest {
    pub fn new(
        logical_key: impl Into<String>,
        desired_identifier: impl Into<String>,
        classification_code: i64,
    ) -> Self {
        Self {
            logical_key: logical_key.into(),
            desired_identifier: desired_identifier.into(),
            classification_code,
            service_url: None,
        }
    }

    pub fn with_service_url(mut self, service_url: impl Into<String>) -> Self {
        self.service_url = Some(service_url.into());
        self
    }

    /// Per-layer output directory name.
    pub fn dir_name(&self) -> String {
        self.logical_key.trim().to_lowercase()
    }
}

/// Shared cancellation flag, cheap to clone into every layer run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), HarvestError> {
        if self.is_cancelled() {
            return Err(HarvestError::FetchAborted(
                "cancellation requested".to_string(),
            ));
        }
        Ok(())
    }
}
