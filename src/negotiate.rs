use tracing::warn;

use crate::capabilities::UniqueList;
use crate::error::HarvestError;

/// Output formats tried after the advertised shape-like ones.
pub const FALLBACK_FORMATS: [&str; 5] = [
    "shapezip",
    "shape-zip",
    "application/zip",
    "SHAPE-ZIP",
    "zip",
];

const SHAPE_LIKE_MARKERS: [&str; 3] = ["shape", "shp", "zip"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubstringPolicy {
    /// Keep every substring match, in advertised order.
    #[default]
    Permissive,
    /// Fail when more than one advertised name matches only by substring.
    RejectAmbiguous,
}

/// Candidate service-side identifiers for `desired`, most specific first.
/// Duplicates are dropped by exact comparison so that case variants the
/// server advertises are still tried.
pub fn resolve_type_names(
    desired: &str,
    advertised: &[String],
    policy: SubstringPolicy,
) -> Result<Vec<String>, HarvestError> {
    let base = desired.trim();
    let lower_base = base.to_lowercase();

    let mut candidates = vec![base.to_string()];
    let mut push = |name: &str| {
        if !candidates.iter().any(|known| known == name) {
            candidates.push(name.to_string());
        }
    };

    for name in advertised {
        if name.to_lowercase() == lower_base {
            push(name);
        }
    }

    if !base.contains(':') {
        for name in advertised {
            let local = name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name);
            if local.to_lowercase() == lower_base {
                push(name);
            }
        }
    }

    let substring_only: Vec<&String> = advertised
        .iter()
        .filter(|name| name.to_lowercase().contains(&lower_base))
        .filter(|name| {
            let lower = name.to_lowercase();
            lower != lower_base
                && lower.rsplit_once(':').map(|(_, local)| local) != Some(lower_base.as_str())
        })
        .collect();

    if substring_only.len() > 1 {
        let matches = substring_only
            .iter()
            .map(|name| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match policy {
            SubstringPolicy::RejectAmbiguous => {
                return Err(HarvestError::AmbiguousTypeName {
                    identifier: base.to_string(),
                    matches,
                });
            }
            SubstringPolicy::Permissive => {
                warn!(identifier = base, matches = %matches, "several advertised names match by substring");
            }
        }
    }

    for name in substring_only {
        push(name);
    }

    Ok(candidates)
}

/// Advertised shape-like formats first, then the fallbacks not already present.
pub fn negotiate_output_formats(advertised: &[String], fallback: &[&str]) -> Vec<String> {
    let mut formats = UniqueList::default();
    for token in advertised {
        let lower = token.to_lowercase();
        if SHAPE_LIKE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            formats.push(token);
        }
    }
    for token in fallback {
        formats.push(token);
    }
    formats.into_inner()
}
