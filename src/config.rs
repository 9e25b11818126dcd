use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{LayerRequest, SrsName};
use crate::error::HarvestError;
use crate::negotiate::SubstringPolicy;
use crate::wfs::{HttpSettings, RetryPolicy, default_service_url};

pub const DEFAULT_CONFIG_FILE: &str = "wfs-harvest.json";

/// BD TOPO land-use layers with their classification codes.
pub const LAND_USE_CATALOGUE: [(&str, &str, i64); 7] = [
    ("BATIMENT", "BDTOPO_V3:batiment", 14),
    ("CIMETIERE", "BDTOPO_V3:cimetiere", 13),
    ("HAIE", "BDTOPO_V3:haie", 19),
    ("SURFACE_HYDROGRAPHIQUE", "BDTOPO_V3:surface_hydrographique", 20),
    ("TERRAIN_DE_SPORT", "BDTOPO_V3:terrain_de_sport", 13),
    ("TRONCON_DE_ROUTE", "BDTOPO_V3:troncon_de_route", 16),
    ("ZONE_DE_VEGETATION", "BDTOPO_V3:zone_de_vegetation", 19),
];

/// BD Topage 2024 hydrography layers served by Sandre.
pub const HYDROGRAPHY_CATALOGUE: [(&str, &str, i64); 2] = [
    ("TOPAGE_TRONCON_HYDROGRAPHIQUE", "TronconHydrographique_FXX_Topage2024", 0),
    ("TOPAGE_SURFACE_HYDROGRAPHIQUE", "SurfaceHydrographique_FXX_Topage2024", 0),
];

/// Latest published RPG parcel layer.
pub const AGRICULTURE_CATALOGUE: [(&str, &str, i64); 1] =
    [("PARCELLES_GRAPHIQUES", "RPG.LATEST:parcelles_graphiques", 0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalogue {
    LandUse,
    Hydrography,
    Agriculture,
    All,
}

impl Catalogue {
    fn entries(&self) -> Vec<(&'static str, &'static str, i64)> {
        match self {
            Catalogue::LandUse => LAND_USE_CATALOGUE.to_vec(),
            Catalogue::Hydrography => HYDROGRAPHY_CATALOGUE.to_vec(),
            Catalogue::Agriculture => AGRICULTURE_CATALOGUE.to_vec(),
            Catalogue::All => LAND_USE_CATALOGUE
                .iter()
                .chain(&HYDROGRAPHY_CATALOGUE)
                .chain(&AGRICULTURE_CATALOGUE)
                .copied()
                .collect(),
        }
    }

    /// Catalogue layers without an endpoint; see [`route_layers`].
    pub fn layers(&self) -> Vec<LayerRequest> {
        self.entries()
            .into_iter()
            .map(|(key, typename, code)| LayerRequest::new(key, typename, code))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub srs: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub strict_type_names: Option<bool>,
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LayerEntry {
    Shorthand(String),
    Detailed(LayerEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LayerEntryObject {
    #[serde(default)]
    pub key: Option<String>,
    pub typename: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub service_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Endpoint for every layer that names none; prefix routing when unset.
    pub service_url: Option<String>,
    pub srs: SrsName,
    pub http: HttpSettings,
    pub substring_policy: SubstringPolicy,
    pub layers: Vec<LayerRequest>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            srs: SrsName::default(),
            http: HttpSettings::default(),
            substring_policy: SubstringPolicy::default(),
            layers: route_layers(default_layers(), None),
        }
    }
}

impl ResolvedConfig {
    /// Sends every layer, including those with their own endpoint, to `service_url`.
    pub fn override_service_url(&mut self, service_url: &str) {
        self.service_url = Some(service_url.to_string());
        for layer in &mut self.layers {
            layer.service_url = Some(service_url.to_string());
        }
    }

    /// Replaces the configured layers with `catalogue`.
    pub fn use_catalogue(&mut self, catalogue: Catalogue) {
        self.layers = route_layers(catalogue.layers(), self.service_url.as_deref());
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path must exist; without one, `wfs-harvest.json` in the
    /// current directory is used when present, built-in defaults otherwise.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let defaults = HttpSettings::default();
        let srs = match config.srs {
            Some(value) => value.parse()?,
            None => SrsName::default(),
        };
        let http = HttpSettings {
            connect_timeout: config
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry: config.retry.unwrap_or(defaults.retry),
        };
        let substring_policy = if config.strict_type_names.unwrap_or(false) {
            SubstringPolicy::RejectAmbiguous
        } else {
            SubstringPolicy::Permissive
        };

        let layers = if config.layers.is_empty() {
            default_layers()
        } else {
            config
                .layers
                .into_iter()
                .map(|entry| match entry {
                    LayerEntry::Shorthand(typename) => layer_from_typename(&typename),
                    LayerEntry::Detailed(obj) => {
                        let base = layer_from_typename(&obj.typename)?;
                        Ok(LayerRequest {
                            logical_key: obj.key.unwrap_or(base.logical_key),
                            desired_identifier: base.desired_identifier,
                            classification_code: obj.code.unwrap_or(base.classification_code),
                            service_url: obj.service_url,
                        })
                    }
                })
                .collect::<Result<Vec<_>, HarvestError>>()?
        };

        let layers = route_layers(layers, config.service_url.as_deref());
        Ok(ResolvedConfig {
            service_url: config.service_url,
            srs,
            http,
            substring_policy,
            layers,
        })
    }
}

pub fn default_layers() -> Vec<LayerRequest> {
    Catalogue::LandUse.layers()
}

/// Fills in the endpoint of layers that name none: `fallback` when given,
/// otherwise the endpoint routed from the type-name prefix.
pub fn route_layers(layers: Vec<LayerRequest>, fallback: Option<&str>) -> Vec<LayerRequest> {
    layers
        .into_iter()
        .map(|mut layer| {
            if layer.service_url.is_none() {
                let url = fallback
                    .unwrap_or_else(|| default_service_url(&layer.desired_identifier));
                layer.service_url = Some(url.to_string());
            }
            layer
        })
        .collect()
}

/// Catalogue entry for `typename`, or a request keyed by the type name's
/// local part with code 0 when it is not catalogued.
fn layer_from_typename(typename: &str) -> Result<LayerRequest, HarvestError> {
    let typename = typename.trim();
    if typename.is_empty() {
        return Err(HarvestError::ConfigParse("empty layer type name".to_string()));
    }
    if let Some((key, known, code)) = Catalogue::All
        .entries()
        .into_iter()
        .find(|(_, known, _)| known.eq_ignore_ascii_case(typename))
    {
        return Ok(LayerRequest::new(key, known, code));
    }
    let local = typename
        .rsplit_once(':')
        .map(|(_, local)| local)
        .unwrap_or(typename);
    Ok(LayerRequest::new(local.to_uppercase(), typename, 0))
}

/// Narrows `layers` to a comma-separated list of type names. Unknown names
/// are rejected; duplicates collapse, request order is kept.
pub fn select_layers(
    layers: &[LayerRequest],
    selection: Option<&str>,
) -> Result<Vec<LayerRequest>, HarvestError> {
    let requested: Vec<&str> = selection
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();
    if requested.is_empty() {
        return Ok(layers.to_vec());
    }

    let unknown: Vec<&str> = requested
        .iter()
        .copied()
        .filter(|name| {
            !layers
                .iter()
                .any(|layer| layer.desired_identifier.eq_ignore_ascii_case(name))
        })
        .collect();
    if !unknown.is_empty() {
        let mut allowed: Vec<&str> = layers
            .iter()
            .map(|layer| layer.desired_identifier.as_str())
            .collect();
        allowed.sort_unstable();
        return Err(HarvestError::UnknownLayer {
            unknown: unknown.join(", "),
            allowed: allowed.join(", "),
        });
    }

    let mut selected: Vec<LayerRequest> = Vec::new();
    for name in requested {
        let Some(layer) = layers
            .iter()
            .find(|layer| layer.desired_identifier.eq_ignore_ascii_case(name))
        else {
            continue;
        };
        if !selected.iter().any(|s| s.logical_key == layer.logical_key) {
            selected.push(layer.clone());
        }
    }
    Ok(selected)
}
