//! Fetch vector layers from OGC WFS services as shapefile bundles and tag
//! their attribute tables with a land-use classification code.
//!
//! Pipeline per layer: capabilities probe, type-name and output-format
//! negotiation, download with candidate exhaustion, safe archive extraction,
//! atomic attribute rewrite. [`app::App`] drives it over a batch of layers.

pub mod app;
pub mod augment;
pub mod capabilities;
pub mod config;
pub mod dbf;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod fetcher;
pub mod fs_util;
pub mod negotiate;
pub mod output;
pub mod wfs;
