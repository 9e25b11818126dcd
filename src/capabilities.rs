//! Best-effort `GetCapabilities` discovery.
//!
//! The document is scanned generically instead of against a WFS schema: any
//! element whose local name ends in `value` yields an output-format token, any
//! element whose local name ends in `name` and whose text is namespace
//! qualified yields a feature-type name. Deployments differ enough (WFS 1.1
//! `ows:Value`, 2.0 `wfs:Name`, vendor extensions) that a strict parse loses
//! more than it gains.

use std::collections::HashSet;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::CancelToken;
use crate::wfs::{WfsClient, capabilities_params};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitiesSnapshot {
    pub output_formats: Vec<String>,
    pub type_names: Vec<String>,
}

impl CapabilitiesSnapshot {
    pub fn is_empty(&self) -> bool {
        self.output_formats.is_empty() && self.type_names.is_empty()
    }
}

/// Never fails: any transport, status or parse problem yields an empty
/// snapshot. Cancellation stops the retries and also yields an empty snapshot.
pub fn probe_capabilities<C: WfsClient + ?Sized>(
    client: &C,
    service_url: &str,
    cancel: &CancelToken,
) -> CapabilitiesSnapshot {
    let body = match client.fetch_document(service_url, &capabilities_params(), cancel) {
        Ok(body) => body,
        Err(err) => {
            warn!(service_url, error = %err, "capabilities request failed");
            return CapabilitiesSnapshot::default();
        }
    };
    match parse_capabilities(&body) {
        Some(snapshot) => {
            debug!(
                service_url,
                formats = snapshot.output_formats.len(),
                type_names = snapshot.type_names.len(),
                "capabilities parsed"
            );
            snapshot
        }
        None => {
            warn!(service_url, "capabilities document could not be parsed");
            CapabilitiesSnapshot::default()
        }
    }
}

/// Returns `None` when the document is not well-formed XML.
pub fn parse_capabilities(document: &[u8]) -> Option<CapabilitiesSnapshot> {
    let mut reader = Reader::from_reader(document);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut open: Vec<(String, String)> = Vec::new();
    let mut formats = UniqueList::default();
    let mut type_names = UniqueList::default();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                saw_root = true;
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                open.push((tag, String::new()));
            }
            Ok(Event::Empty(_)) => {
                saw_root = true;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?;
                if let Some((_, content)) = open.last_mut() {
                    content.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                if let Some((_, content)) = open.last_mut() {
                    content.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let (tag, content) = open.pop()?;
                let value = content.trim();
                if !value.is_empty() && tag.ends_with("value") {
                    formats.push(value);
                }
                if !value.is_empty() && tag.ends_with("name") && value.contains(':') {
                    type_names.push(value);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root || !open.is_empty() {
        return None;
    }
    Some(CapabilitiesSnapshot {
        output_formats: formats.into_inner(),
        type_names: type_names.into_inner(),
    })
}

/// Insertion-ordered list, deduplicated case-insensitively.
#[derive(Debug, Default)]
pub(crate) struct UniqueList {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl UniqueList {
    pub(crate) fn push(&mut self, value: &str) -> bool {
        if self.seen.insert(value.to_lowercase()) {
            self.items.push(value.to_string());
            return true;
        }
        false
    }

    pub(crate) fn into_inner(self) -> Vec<String> {
        self.items
    }
}
