mod common;

use std::fs;

use assert_matches::assert_matches;

use common::{dbf_bytes, text_rows, write_bundle};
use wfs_harvest::augment::{CLASSIFICATION_FIELD, read_attribute_table, set_classification_code};
use wfs_harvest::dbf::{DbfTable, TextEncoding};
use wfs_harvest::error::HarvestError;

fn code_values(table: &DbfTable) -> Vec<String> {
    let index = table.field_index(CLASSIFICATION_FIELD).unwrap();
    (0..table.record_count())
        .map(|record| {
            String::from_utf8(table.value(record, index).unwrap().to_vec())
                .unwrap()
                .trim()
                .to_string()
        })
        .collect()
}

#[test]
fn appends_classification_field_to_every_record() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(
        &[("ID", 'N', 4), ("NATURE", 'C', 16)],
        &text_rows(&[&["1", "Haie"], &["2", "Bosquet"], &["3", "Alignement"]]),
    );
    let shp = write_bundle(temp.path(), "haie", &dbf, 3);
    let original_shp = fs::read(&shp).unwrap();

    let summary = set_classification_code(&shp, 19).unwrap();
    assert_eq!(summary.records, 3);
    assert_eq!(summary.encoding, TextEncoding::Utf8);
    assert!(summary.field_added);

    let (table, _) = read_attribute_table(&temp.path().join("haie.dbf")).unwrap();
    assert_eq!(table.fields().len(), 3);
    assert_eq!(code_values(&table), vec!["19", "19", "19"]);
    let nature = table.field_index("nature").unwrap();
    assert_eq!(table.value(1, nature).unwrap(), b"Bosquet         ");
    assert_eq!(fs::read(&shp).unwrap(), original_shp);
}

#[test]
fn second_run_keeps_a_single_field() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(
        &[("NATURE", 'C', 12)],
        &text_rows(&[&["Prairie"], &["Foret"]]),
    );
    let shp = write_bundle(temp.path(), "zone", &dbf, 2);

    set_classification_code(&shp, 19).unwrap();
    let first = fs::read(temp.path().join("zone.dbf")).unwrap();
    let summary = set_classification_code(&shp, 19).unwrap();
    assert!(!summary.field_added);
    let second = fs::read(temp.path().join("zone.dbf")).unwrap();
    assert_eq!(first.len(), second.len());

    let table = DbfTable::parse(&second).unwrap();
    let code_fields = table
        .fields()
        .iter()
        .filter(|field| field.name.eq_ignore_ascii_case(CLASSIFICATION_FIELD))
        .count();
    assert_eq!(code_fields, 1);
    assert_eq!(table.record_count(), 2);
    assert_eq!(code_values(&table), vec!["19", "19"]);
}

#[test]
fn existing_field_is_overwritten_in_place() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(
        &[("code_lu", 'N', 10), ("NOM", 'C', 8)],
        &text_rows(&[&["4", "Stade"]]),
    );
    let shp = write_bundle(temp.path(), "sport", &dbf, 1);

    let summary = set_classification_code(&shp, 13).unwrap();
    assert!(!summary.field_added);
    let (table, _) = read_attribute_table(&temp.path().join("sport.dbf")).unwrap();
    assert_eq!(table.fields().len(), 2);
    assert_eq!(code_values(&table), vec!["13"]);
}

#[test]
fn latin1_table_is_detected_and_preserved() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(&[("NOM", 'C', 10)], &[vec![b"\xe9glise".to_vec()]]);
    let shp = write_bundle(temp.path(), "batiment", &dbf, 1);

    let summary = set_classification_code(&shp, 14).unwrap();
    assert_eq!(summary.encoding, TextEncoding::Latin1);
    let (table, _) = read_attribute_table(&temp.path().join("batiment.dbf")).unwrap();
    let nom = table.field_index("NOM").unwrap();
    assert_eq!(table.value(0, nom).unwrap(), b"\xe9glise    ");
}

#[test]
fn control_range_bytes_are_accepted_and_kept() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(&[("NOM", 'C', 8)], &[vec![b"Ca\x81e".to_vec()]]);
    let shp = write_bundle(temp.path(), "batiment", &dbf, 1);

    let summary = set_classification_code(&shp, 14).unwrap();
    assert_eq!(summary.encoding, TextEncoding::Latin1);
    let (table, _) = read_attribute_table(&temp.path().join("batiment.dbf")).unwrap();
    let nom = table.field_index("NOM").unwrap();
    assert_eq!(table.value(0, nom).unwrap(), b"Ca\x81e    ");
    assert_eq!(code_values(&table), vec!["14"]);
}

#[test]
fn cp1252_punctuation_is_reported_as_cp1252() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(&[("NOM", 'C', 10)], &[vec![b"l\x92\xe9cole".to_vec()]]);
    let shp = write_bundle(temp.path(), "ecole", &dbf, 1);

    let summary = set_classification_code(&shp, 14).unwrap();
    assert_eq!(summary.encoding, TextEncoding::Cp1252);
    let (table, _) = read_attribute_table(&temp.path().join("ecole.dbf")).unwrap();
    let nom = table.field_index("NOM").unwrap();
    assert_eq!(table.value(0, nom).unwrap(), b"l\x92\xe9cole   ");
}

#[test]
fn malformed_table_leaves_bundle_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let mut dbf = dbf_bytes(&[("NOM", 'C', 4)], &text_rows(&[&["a"]]));
    dbf[10..12].copy_from_slice(&99u16.to_le_bytes());
    let shp = write_bundle(temp.path(), "broken", &dbf, 1);
    let original_shp = fs::read(&shp).unwrap();
    let original_shx = fs::read(temp.path().join("broken.shx")).unwrap();

    let err = set_classification_code(&shp, 1).unwrap_err();
    assert_matches!(err, HarvestError::AttributeWriteFailure(ref reason) if reason.contains("malformed"));
    assert_eq!(fs::read(temp.path().join("broken.dbf")).unwrap(), dbf);
    assert_eq!(fs::read(&shp).unwrap(), original_shp);
    assert_eq!(fs::read(temp.path().join("broken.shx")).unwrap(), original_shx);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 3);
}

#[test]
fn missing_sibling_fails_before_writing() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(&[("NOM", 'C', 4)], &text_rows(&[&["a"]]));
    let shp = write_bundle(temp.path(), "partial", &dbf, 1);
    fs::remove_file(temp.path().join("partial.shx")).unwrap();

    assert_matches!(
        set_classification_code(&shp, 1),
        Err(HarvestError::AttributeWriteFailure(_))
    );
    assert_eq!(fs::read(temp.path().join("partial.dbf")).unwrap(), dbf);
}

#[test]
fn staging_directory_is_cleaned_up() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(&[("NOM", 'C', 4)], &text_rows(&[&["a"]]));
    let shp = write_bundle(temp.path(), "clean", &dbf, 1);

    set_classification_code(&shp, 7).unwrap();
    let mut names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["clean.dbf", "clean.shp", "clean.shx"]);
}

#[test]
fn value_wider_than_existing_field_fails() {
    let temp = tempfile::tempdir().unwrap();
    let dbf = dbf_bytes(&[("CODE_LU", 'N', 2), ("NOM", 'C', 4)], &text_rows(&[&["1", "a"]]));
    let shp = write_bundle(temp.path(), "narrow", &dbf, 1);

    assert_matches!(
        set_classification_code(&shp, 12345),
        Err(HarvestError::AttributeWriteFailure(_))
    );
    assert_eq!(fs::read(temp.path().join("narrow.dbf")).unwrap(), dbf);
}
