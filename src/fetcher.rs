use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{CancelToken, Envelope, SrsName};
use crate::error::HarvestError;
use crate::fs_util::{extract_zip, remove_file_if_exists};
use crate::wfs::{GetFeatureQuery, WfsClient};

/// Diagnostics longer than this are cut in the final error.
pub const DIAGNOSTIC_LIMIT: usize = 200;

const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub service_url: &'a str,
    pub srs: &'a SrsName,
    pub envelope: &'a Envelope,
    pub cancel: &'a CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub type_name: String,
    pub output_format: String,
    pub diagnostic: String,
}

#[derive(Debug, Clone)]
pub struct FetchedLayer {
    pub type_name: String,
    pub output_format: String,
    pub shp_path: PathBuf,
    pub attempts: Vec<AttemptRecord>,
}

enum AttemptOutcome {
    Bundle(PathBuf),
    Rejected(String),
}

/// Tries every (type name, format) pair, type names outer, until one yields an
/// archive with a `.shp` member extracted into `out_dir`.
pub fn fetch_layer_bundle<C: WfsClient + ?Sized>(
    client: &C,
    ctx: &FetchContext<'_>,
    type_names: &[String],
    formats: &[String],
    out_dir: &Path,
) -> Result<FetchedLayer, HarvestError> {
    fs::create_dir_all(out_dir).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut attempts = Vec::new();

    for type_name in type_names {
        for format in formats {
            ctx.cancel.check()?;
            debug!(type_name, format, "GetFeature attempt");
            match attempt(client, ctx, type_name, format, out_dir)? {
                AttemptOutcome::Bundle(shp_path) => {
                    info!(type_name, format, shp = %shp_path.display(), "layer downloaded");
                    return Ok(FetchedLayer {
                        type_name: type_name.clone(),
                        output_format: format.clone(),
                        shp_path,
                        attempts,
                    });
                }
                AttemptOutcome::Rejected(diagnostic) => {
                    debug!(type_name, format, diagnostic = %truncate(&diagnostic, DIAGNOSTIC_LIMIT), "attempt rejected");
                    attempts.push(AttemptRecord {
                        type_name: type_name.clone(),
                        output_format: format.clone(),
                        diagnostic,
                    });
                }
            }
        }
    }

    let identifier = type_names
        .first()
        .cloned()
        .unwrap_or_else(|| "<none>".to_string());
    let last_diagnostic = attempts
        .last()
        .map(|record| truncate(&record.diagnostic, DIAGNOSTIC_LIMIT))
        .unwrap_or_else(|| "layer not found".to_string());
    Err(HarvestError::FetchExhausted {
        identifier,
        last_diagnostic,
    })
}

fn attempt<C: WfsClient + ?Sized>(
    client: &C,
    ctx: &FetchContext<'_>,
    type_name: &str,
    format: &str,
    out_dir: &Path,
) -> Result<AttemptOutcome, HarvestError> {
    let query = GetFeatureQuery {
        type_name,
        srs: ctx.srs,
        envelope: ctx.envelope,
        output_format: format,
    };
    let zip_path = out_dir.join(archive_name(type_name));

    let download = client.download(ctx.service_url, &query.params(), &zip_path, ctx.cancel);
    let info = match download {
        Ok(info) => info,
        Err(err) => {
            remove_file_if_exists(&zip_path)?;
            return match err {
                HarvestError::HttpStatus { status, message } => {
                    Ok(AttemptOutcome::Rejected(format!("HTTP {status}: {message}")))
                }
                HarvestError::Http(message) => {
                    Ok(AttemptOutcome::Rejected(format!("network error: {message}")))
                }
                other => Err(other),
            };
        }
    };

    let head = read_head(&zip_path)?;
    if is_markup(info.content_type.as_deref(), &head) {
        let body = fs::read(&zip_path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        remove_file_if_exists(&zip_path)?;
        return Ok(AttemptOutcome::Rejected(
            String::from_utf8_lossy(&body).into_owned(),
        ));
    }

    let extracted = extract_zip(&zip_path, out_dir);
    remove_file_if_exists(&zip_path)?;
    match extracted {
        Ok(paths) => match paths.into_iter().find(|path| has_extension(path, "shp")) {
            Some(shp) => Ok(AttemptOutcome::Bundle(shp)),
            None => Ok(AttemptOutcome::Rejected(format!(
                "no .shp found after extraction for {type_name}"
            ))),
        },
        Err(err @ (HarvestError::CorruptArchive(_) | HarvestError::PathTraversal(_))) => {
            Ok(AttemptOutcome::Rejected(err.to_string()))
        }
        Err(err) => Err(err),
    }
}

/// Error documents (OWS exception reports, HTML error pages) instead of an archive.
pub fn is_markup(content_type: Option<&str>, head: &[u8]) -> bool {
    let declared = content_type
        .map(|value| {
            let value = value.to_ascii_lowercase();
            value.contains("xml") || value.contains("html")
        })
        .unwrap_or(false);
    let first = head.iter().position(|b| !b.is_ascii_whitespace());
    let sniffed = first.is_some_and(|start| head[start] == b'<');
    declared || sniffed
}

pub fn archive_name(type_name: &str) -> String {
    let safe: String = type_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}.zip")
}

fn read_head(path: &Path) -> Result<Vec<u8>, HarvestError> {
    let file = fs::File::open(path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(head)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|value| value.eq_ignore_ascii_case(ext))
}

pub fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
