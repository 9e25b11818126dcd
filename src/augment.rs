use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::dbf::{DbfTable, TextEncoding};
use crate::error::HarvestError;

pub const CLASSIFICATION_FIELD: &str = "CODE_LU";
pub const CLASSIFICATION_WIDTH: u8 = 10;
pub const TABLE_ENCODINGS: [TextEncoding; 3] =
    [TextEncoding::Utf8, TextEncoding::Latin1, TextEncoding::Cp1252];

/// Files rewritten by the augmenter, in rename order.
const REWRITTEN: [&str; 3] = ["shp", "shx", "dbf"];

const SHP_FILE_CODE: i32 = 9994;

/// Sibling files of one shapefile, located by shared base name.
#[derive(Debug, Clone)]
pub struct ShapefileBundle {
    dir: PathBuf,
    stem: String,
}

impl ShapefileBundle {
    pub fn from_shp(shp_path: &Path) -> Result<Self, HarvestError> {
        let stem = shp_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                HarvestError::AttributeWriteFailure(format!(
                    "invalid shapefile path {}",
                    shp_path.display()
                ))
            })?
            .to_string();
        let dir = shp_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { dir, stem })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Existing sibling with extension `ext`, matched case-insensitively.
    pub fn sibling(&self, ext: &str) -> Option<PathBuf> {
        let exact = self.dir.join(format!("{}.{ext}", self.stem));
        if exact.is_file() {
            return Some(exact);
        }
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path.file_stem().and_then(|s| s.to_str()) == Some(self.stem.as_str())
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
            })
    }

    fn require(&self, ext: &str) -> Result<PathBuf, HarvestError> {
        self.sibling(ext).ok_or_else(|| {
            HarvestError::AttributeWriteFailure(format!(
                "missing .{ext} sibling for {}",
                self.dir.join(&self.stem).display()
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AugmentSummary {
    pub records: usize,
    pub encoding: TextEncoding,
    pub field_added: bool,
}

/// Reads the table with the first encoding it decodes under. Text is never
/// transcoded; the encoding is only reported.
pub fn read_attribute_table(dbf_path: &Path) -> Result<(DbfTable, TextEncoding), HarvestError> {
    let bytes = fs::read(dbf_path).map_err(|err| {
        HarvestError::AttributeWriteFailure(format!("read {}: {err}", dbf_path.display()))
    })?;
    let table = DbfTable::parse(&bytes)?;
    let accepted = table
        .detect_encoding(&TABLE_ENCODINGS)
        .ok_or_else(|| HarvestError::UnreadableEncoding(dbf_path.to_path_buf()))?;
    let encoding = table.reported_encoding(accepted);
    Ok((table, encoding))
}

/// Writes `code` into the classification field of every record of the bundle
/// whose geometry file is `shp_path`. All-or-nothing: the originals are only
/// touched by the final renames, once every temporary file is complete.
pub fn set_classification_code(shp_path: &Path, code: i64) -> Result<AugmentSummary, HarvestError> {
    let bundle = ShapefileBundle::from_shp(shp_path)?;
    let originals = REWRITTEN
        .iter()
        .map(|ext| bundle.require(ext))
        .collect::<Result<Vec<_>, _>>()?;
    let (shp, shx, dbf) = (&originals[0], &originals[1], &originals[2]);

    let shp_bytes = fs::read(shp).map_err(|err| write_failure(shp, err))?;
    let shx_bytes = fs::read(shx).map_err(|err| write_failure(shx, err))?;
    check_geometry_header(shp, &shp_bytes)?;

    let (mut table, encoding) = read_attribute_table(dbf)?;
    let shape_count = index_record_count(&shx_bytes);
    if shape_count != Some(table.record_count()) {
        warn!(
            path = %shp.display(),
            shapes = ?shape_count,
            records = table.record_count(),
            "shape and attribute record counts differ"
        );
    }
    let field_added = table.set_integer_field(CLASSIFICATION_FIELD, CLASSIFICATION_WIDTH, code)?;
    let dbf_bytes = table.to_bytes()?;

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}_tmp", bundle.stem()))
        .tempdir_in(&bundle.dir)
        .map_err(|err| HarvestError::AttributeWriteFailure(err.to_string()))?;
    let staged: Vec<PathBuf> = REWRITTEN
        .iter()
        .map(|ext| staging.path().join(format!("{}.{ext}", bundle.stem())))
        .collect();
    write_synced(&staged[0], &shp_bytes)?;
    write_synced(&staged[1], &shx_bytes)?;
    write_synced(&staged[2], &dbf_bytes)?;

    for (temp, original) in staged.iter().zip(&originals) {
        fs::rename(temp, original).map_err(|err| write_failure(original, err))?;
    }
    debug!(
        path = %dbf.display(),
        records = table.record_count(),
        %encoding,
        field_added,
        "classification code written"
    );

    Ok(AugmentSummary {
        records: table.record_count(),
        encoding,
        field_added,
    })
}

fn write_synced(path: &Path, content: &[u8]) -> Result<(), HarvestError> {
    let mut file = fs::File::create(path).map_err(|err| write_failure(path, err))?;
    file.write_all(content)
        .map_err(|err| write_failure(path, err))?;
    file.sync_all().map_err(|err| write_failure(path, err))?;
    Ok(())
}

fn check_geometry_header(path: &Path, bytes: &[u8]) -> Result<(), HarvestError> {
    let file_code = bytes
        .get(..4)
        .map(|code| i32::from_be_bytes([code[0], code[1], code[2], code[3]]));
    if bytes.len() < 100 || file_code != Some(SHP_FILE_CODE) {
        return Err(HarvestError::AttributeWriteFailure(format!(
            "{} is not a shapefile geometry file",
            path.display()
        )));
    }
    Ok(())
}

/// Record count implied by a `.shx` index: 100-byte header, 8 bytes per shape.
fn index_record_count(shx: &[u8]) -> Option<usize> {
    (shx.len() >= 100).then(|| (shx.len() - 100) / 8)
}

fn write_failure(path: &Path, err: std::io::Error) -> HarvestError {
    HarvestError::AttributeWriteFailure(format!("{}: {err}", path.display()))
}
