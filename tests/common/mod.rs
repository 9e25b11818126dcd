#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use wfs_harvest::domain::CancelToken;
use wfs_harvest::error::HarvestError;
use wfs_harvest::wfs::{DownloadInfo, WfsClient};
use zip::write::SimpleFileOptions;

pub const CAPABILITIES_11: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:WFS_Capabilities version="1.1.0"
    xmlns:wfs="http://www.opengis.net/wfs"
    xmlns:ows="http://www.opengis.net/ows">
  <ows:OperationsMetadata>
    <ows:Operation name="GetFeature">
      <ows:Parameter name="outputFormat">
        <ows:Value>text/xml; subtype=gml/3.1.1</ows:Value>
        <ows:Value>application/json</ows:Value>
        <ows:Value>SHAPE-ZIP</ows:Value>
      </ows:Parameter>
    </ows:Operation>
  </ows:OperationsMetadata>
  <wfs:FeatureTypeList>
    <wfs:FeatureType>
      <wfs:Name>BDTOPO_V3:haie</wfs:Name>
      <wfs:Title>Haie</wfs:Title>
    </wfs:FeatureType>
    <wfs:FeatureType>
      <wfs:Name>BDTOPO_V3:batiment</wfs:Name>
      <wfs:Title>Batiment</wfs:Title>
    </wfs:FeatureType>
  </wfs:FeatureTypeList>
</wfs:WFS_Capabilities>
"#;

pub const EXCEPTION_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows" version="1.1.0">
  <ows:Exception exceptionCode="InvalidParameterValue" locator="outputFormat">
    <ows:ExceptionText>Unknown output format</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>
"#;

/// Character field `(name, 'C', width)` or numeric field `(name, 'N', width)`.
pub type FieldSpec<'a> = (&'a str, char, u8);

/// dBASE III table with the given fields and rows. Values are padded to the
/// field width: character values on the right, numeric values on the left.
pub fn dbf_bytes(fields: &[FieldSpec<'_>], rows: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let record_len: usize = 1 + fields.iter().map(|(_, _, len)| *len as usize).sum::<usize>();
    let header_len = 32 + fields.len() * 32 + 1;

    let mut out = vec![0u8; 32];
    out[0] = 0x03;
    out[1] = 124;
    out[2] = 1;
    out[3] = 1;
    out[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

    for (name, kind, len) in fields {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = *kind as u8;
        descriptor[16] = *len;
        out.extend_from_slice(&descriptor);
    }
    out.push(0x0D);

    for row in rows {
        out.push(b' ');
        for ((_, kind, len), value) in fields.iter().zip(row) {
            let width = *len as usize;
            let pad = width - value.len();
            if *kind == 'N' {
                out.extend(std::iter::repeat_n(b' ', pad));
                out.extend_from_slice(value);
            } else {
                out.extend_from_slice(value);
                out.extend(std::iter::repeat_n(b' ', pad));
            }
        }
    }
    out.push(0x1A);
    out
}

pub fn text_rows(rows: &[&[&str]]) -> Vec<Vec<Vec<u8>>> {
    rows.iter()
        .map(|row| row.iter().map(|value| value.as_bytes().to_vec()).collect())
        .collect()
}

/// Geometry file and index with a valid 100-byte header and `shapes` index entries.
pub fn shp_and_shx(shapes: usize) -> (Vec<u8>, Vec<u8>) {
    let mut header = vec![0u8; 100];
    header[..4].copy_from_slice(&9994i32.to_be_bytes());
    header[28..32].copy_from_slice(&1000i32.to_le_bytes());
    header[32..36].copy_from_slice(&5i32.to_le_bytes());

    let shp = header.clone();
    let mut shx = header;
    for index in 0..shapes {
        shx.extend_from_slice(&(50 + index as i32 * 14).to_be_bytes());
        shx.extend_from_slice(&10i32.to_be_bytes());
    }
    (shp, shx)
}

/// Writes `stem.shp`, `stem.shx`, `stem.dbf` under `dir` and returns the `.shp` path.
pub fn write_bundle(dir: &Path, stem: &str, dbf: &[u8], shapes: usize) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let (shp, shx) = shp_and_shx(shapes);
    let shp_path = dir.join(format!("{stem}.shp"));
    fs::write(&shp_path, shp).unwrap();
    fs::write(dir.join(format!("{stem}.shx")), shx).unwrap();
    fs::write(dir.join(format!("{stem}.dbf")), dbf).unwrap();
    shp_path
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Zipped shapefile bundle with two features and a `NATURE` text field.
pub fn bundle_archive(stem: &str) -> Vec<u8> {
    let dbf = dbf_bytes(
        &[("ID", 'N', 4), ("NATURE", 'C', 20)],
        &text_rows(&[&["1", "Haie"], &["2", "Bosquet"]]),
    );
    let (shp, shx) = shp_and_shx(2);
    let shp_name = format!("{stem}.shp");
    let shx_name = format!("{stem}.shx");
    let dbf_name = format!("{stem}.dbf");
    let prj_name = format!("{stem}.prj");
    zip_bytes(&[
        (shp_name.as_str(), shp.as_slice()),
        (shx_name.as_str(), shx.as_slice()),
        (dbf_name.as_str(), dbf.as_slice()),
        (prj_name.as_str(), b"PROJCS[\"RGF93 / Lambert-93\"]".as_slice()),
    ])
}

pub fn write_geojson(dir: &Path, value: &serde_json::Value) -> PathBuf {
    let path = dir.join("footprint.geojson");
    fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
    path
}

/// Scripted reply to one `download` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    Archive(Vec<u8>),
    Document {
        content_type: Option<String>,
        body: Vec<u8>,
    },
    Status(u16, String),
    Network(String),
    /// Cancels the token mid-transfer, leaving a partial file behind.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub service_url: String,
    pub params: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// In-memory WFS endpoint. Downloads consume `replies` in order and answer
/// 404 once the script runs out. Clones share the script and the call logs.
#[derive(Clone, Default)]
pub struct MockWfs {
    capabilities: Option<Vec<u8>>,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    pub documents: Arc<Mutex<Vec<RecordedCall>>>,
    pub downloads: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockWfs {
    pub fn new(capabilities: Option<&str>, replies: Vec<MockReply>) -> Self {
        Self {
            capabilities: capabilities.map(|doc| doc.as_bytes().to_vec()),
            replies: Arc::new(Mutex::new(replies.into())),
            ..Self::default()
        }
    }

    pub fn download_calls(&self) -> Vec<RecordedCall> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn document_calls(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn document_urls(&self) -> Vec<String> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.service_url.clone())
            .collect()
    }
}

fn record(service_url: &str, params: &[(&'static str, String)]) -> RecordedCall {
    RecordedCall {
        service_url: service_url.to_string(),
        params: params
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
    }
}

impl WfsClient for MockWfs {
    fn fetch_document(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, HarvestError> {
        cancel.check()?;
        self.documents
            .lock()
            .unwrap()
            .push(record(service_url, params));
        match &self.capabilities {
            Some(body) => Ok(body.clone()),
            None => Err(HarvestError::HttpStatus {
                status: 500,
                message: "capabilities unavailable".to_string(),
            }),
        }
    }

    fn download(
        &self,
        service_url: &str,
        params: &[(&'static str, String)],
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<DownloadInfo, HarvestError> {
        self.downloads
            .lock()
            .unwrap()
            .push(record(service_url, params));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockReply::Status(404, "not found".to_string()));
        match reply {
            MockReply::Archive(bytes) => {
                fs::write(destination, bytes).unwrap();
                Ok(DownloadInfo {
                    content_type: Some("application/zip".to_string()),
                })
            }
            MockReply::Document { content_type, body } => {
                fs::write(destination, body).unwrap();
                Ok(DownloadInfo { content_type })
            }
            MockReply::Status(status, message) => Err(HarvestError::HttpStatus { status, message }),
            MockReply::Network(message) => Err(HarvestError::Http(message)),
            MockReply::Cancel => {
                fs::write(destination, b"PK\x03\x04partial").unwrap();
                cancel.cancel();
                cancel.check().map(|_| DownloadInfo { content_type: None })
            }
        }
    }
}
