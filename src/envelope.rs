//! Query window derivation from GeoJSON input.
//!
//! Accepts a bare geometry, a `Feature`, a `FeatureCollection` or a
//! `GeometryCollection`. Coordinates are walked recursively: any array whose
//! first two elements are numbers is a position, extra ordinates (Z, M) are
//! ignored.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::domain::{Envelope, SrsName};
use crate::error::HarvestError;

pub fn envelope_from_path(
    path: &Path,
    buffer: f64,
    srs: &SrsName,
) -> Result<Envelope, HarvestError> {
    let content = fs::read_to_string(path).map_err(|err| {
        HarvestError::InvalidInput(format!("read geometry {}: {err}", path.display()))
    })?;
    let payload: Value = serde_json::from_str(&content).map_err(|err| {
        HarvestError::InvalidInput(format!("parse geometry {}: {err}", path.display()))
    })?;
    envelope_from_geojson(&payload, buffer, srs)
}

pub fn envelope_from_geojson(
    payload: &Value,
    buffer: f64,
    srs: &SrsName,
) -> Result<Envelope, HarvestError> {
    if !buffer.is_finite() || buffer < 0.0 {
        return Err(HarvestError::InvalidInput(format!(
            "buffer must be a non-negative number, got {buffer}"
        )));
    }
    check_declared_crs(payload, srs)?;

    let mut bounds: Option<Bounds> = None;
    let mut geometries = Vec::new();
    collect_geometries(payload, srs, &mut geometries)?;
    for geometry in geometries {
        check_declared_crs(geometry, srs)?;
        if let Some(coords) = geometry.get("coordinates") {
            visit_positions(coords, &mut |x, y| match bounds.as_mut() {
                Some(b) => b.extend(x, y),
                None => bounds = Some(Bounds::at(x, y)),
            });
        }
    }

    let bounds = bounds.ok_or_else(|| {
        HarvestError::InvalidInput("no valid coordinate found in geometry input".to_string())
    })?;
    Envelope::new(bounds.xmin, bounds.ymin, bounds.xmax, bounds.ymax)?.buffered(buffer)
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl Bounds {
    fn at(x: f64, y: f64) -> Self {
        Self {
            xmin: x,
            ymin: y,
            xmax: x,
            ymax: y,
        }
    }

    fn extend(&mut self, x: f64, y: f64) {
        self.xmin = self.xmin.min(x);
        self.ymin = self.ymin.min(y);
        self.xmax = self.xmax.max(x);
        self.ymax = self.ymax.max(y);
    }
}

/// Features are checked for a conflicting `crs` member on the way down.
fn collect_geometries<'a>(
    payload: &'a Value,
    srs: &SrsName,
    out: &mut Vec<&'a Value>,
) -> Result<(), HarvestError> {
    let Some(object) = payload.as_object() else {
        return Ok(());
    };
    match object.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            if let Some(features) = object.get("features").and_then(Value::as_array) {
                for feature in features {
                    collect_feature(feature, srs, out)?;
                }
            }
        }
        Some("Feature") => collect_feature(payload, srs, out)?,
        Some("GeometryCollection") => {
            if let Some(members) = object.get("geometries").and_then(Value::as_array) {
                for member in members {
                    collect_geometries(member, srs, out)?;
                }
            }
        }
        _ => {
            if object.get("coordinates").is_some_and(Value::is_array) {
                out.push(payload);
            }
        }
    }
    Ok(())
}

fn collect_feature<'a>(
    feature: &'a Value,
    srs: &SrsName,
    out: &mut Vec<&'a Value>,
) -> Result<(), HarvestError> {
    check_declared_crs(feature, srs)?;
    match feature.get("geometry") {
        Some(geometry) => collect_geometries(geometry, srs, out),
        None => Ok(()),
    }
}

fn visit_positions(coords: &Value, visit: &mut dyn FnMut(f64, f64)) {
    let Some(items) = coords.as_array() else {
        return;
    };
    if items.len() >= 2 {
        if let (Some(x), Some(y)) = (items[0].as_f64(), items[1].as_f64()) {
            visit(x, y);
            return;
        }
    }
    for item in items {
        visit_positions(item, visit);
    }
}

/// Rejects inputs whose legacy `crs` member names a different CRS.
fn check_declared_crs(payload: &Value, srs: &SrsName) -> Result<(), HarvestError> {
    let Some(crs) = payload.get("crs") else {
        return Ok(());
    };
    if crs.is_null() {
        return Ok(());
    }
    let properties = crs.get("properties");
    let declared = properties
        .and_then(|props| props.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            properties
                .and_then(|props| props.get("code"))
                .and_then(Value::as_u64)
                .map(|code| format!("EPSG:{code}"))
        });
    match declared {
        Some(name) if srs.matches(&name) => Ok(()),
        Some(name) => Err(HarvestError::InvalidInput(format!(
            "geometry declares CRS {name}, expected {srs}"
        ))),
        None => Err(HarvestError::InvalidInput(
            "unrecognised crs declaration in geometry input".to_string(),
        )),
    }
}
