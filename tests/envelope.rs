mod common;

use assert_matches::assert_matches;
use serde_json::json;

use wfs_harvest::domain::{Envelope, SrsName};
use wfs_harvest::envelope::{envelope_from_geojson, envelope_from_path};
use wfs_harvest::error::HarvestError;

fn lambert() -> SrsName {
    SrsName::default()
}

#[test]
fn single_point_with_buffer() {
    let point = json!({ "type": "Point", "coordinates": [652000.0, 6862000.0] });
    let envelope = envelope_from_geojson(&point, 100.0, &lambert()).unwrap();
    assert_eq!(
        envelope,
        Envelope::new(651900.0, 6861900.0, 652100.0, 6862100.0).unwrap()
    );
}

#[test]
fn feature_collection_covers_every_feature() {
    let collection = json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [10.0, 0.0], [10.0, 5.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": {},
                "geometry": { "type": "Point", "coordinates": [-3.0, 12.0] }
            },
            { "type": "Feature", "properties": {}, "geometry": null }
        ]
    });
    let envelope = envelope_from_geojson(&collection, 0.0, &lambert()).unwrap();
    assert_eq!(envelope.xmin(), -3.0);
    assert_eq!(envelope.ymin(), 0.0);
    assert_eq!(envelope.xmax(), 10.0);
    assert_eq!(envelope.ymax(), 12.0);
}

#[test]
fn nesting_does_not_change_the_box() {
    let polygon = json!({
        "type": "Polygon",
        "coordinates": [[[1.0, 2.0], [7.0, 2.0], [7.0, 9.0], [1.0, 2.0]]]
    });
    let feature = json!({ "type": "Feature", "properties": {}, "geometry": polygon.clone() });
    let collection = json!({ "type": "FeatureCollection", "features": [feature.clone()] });
    let geometries = json!({ "type": "GeometryCollection", "geometries": [polygon.clone()] });

    let bare = envelope_from_geojson(&polygon, 5.0, &lambert()).unwrap();
    for wrapped in [&feature, &collection, &geometries] {
        assert_eq!(envelope_from_geojson(wrapped, 5.0, &lambert()).unwrap(), bare);
    }
}

#[test]
fn third_ordinate_is_ignored() {
    let line = json!({
        "type": "LineString",
        "coordinates": [[0.0, 0.0, 150.0], [4.0, 3.0, -20.0]]
    });
    let envelope = envelope_from_geojson(&line, 0.0, &lambert()).unwrap();
    assert_eq!(envelope, Envelope::new(0.0, 0.0, 4.0, 3.0).unwrap());
}

#[test]
fn empty_collection_is_invalid_input() {
    let empty = json!({ "type": "FeatureCollection", "features": [] });
    assert_matches!(
        envelope_from_geojson(&empty, 0.0, &lambert()),
        Err(HarvestError::InvalidInput(_))
    );
}

#[test]
fn negative_buffer_is_invalid_input() {
    let point = json!({ "type": "Point", "coordinates": [1.0, 1.0] });
    assert_matches!(
        envelope_from_geojson(&point, -1.0, &lambert()),
        Err(HarvestError::InvalidInput(_))
    );
}

#[test]
fn conflicting_declared_crs_is_rejected() {
    let point = json!({
        "type": "Point",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::4326" } },
        "coordinates": [2.35, 48.85]
    });
    assert_matches!(
        envelope_from_geojson(&point, 0.0, &lambert()),
        Err(HarvestError::InvalidInput(_))
    );

    let matching = json!({
        "type": "Point",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::2154" } },
        "coordinates": [652000.0, 6862000.0]
    });
    assert!(envelope_from_geojson(&matching, 0.0, &lambert()).is_ok());
}

#[test]
fn reads_geometry_from_disk() {
    let temp = tempfile::tempdir().unwrap();
    let path = common::write_geojson(
        temp.path(),
        &json!({ "type": "MultiPoint", "coordinates": [[10.0, 20.0], [30.0, 40.0]] }),
    );
    let envelope = envelope_from_path(&path, 1.0, &lambert()).unwrap();
    assert_eq!(envelope, Envelope::new(9.0, 19.0, 31.0, 41.0).unwrap());

    assert_matches!(
        envelope_from_path(&temp.path().join("missing.geojson"), 0.0, &lambert()),
        Err(HarvestError::InvalidInput(_))
    );
}

#[test]
fn malformed_json_is_invalid_input() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.geojson");
    std::fs::write(&path, "{ \"type\": ").unwrap();
    assert_matches!(
        envelope_from_path(&path, 0.0, &lambert()),
        Err(HarvestError::InvalidInput(_))
    );
}
