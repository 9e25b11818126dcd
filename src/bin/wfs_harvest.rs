use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use wfs_harvest::app::{App, HarvestReport, ServiceParams};
use wfs_harvest::config::{Catalogue, ConfigLoader, ResolvedConfig, route_layers, select_layers};
use wfs_harvest::domain::{LayerRequest, SrsName};
use wfs_harvest::envelope::envelope_from_path;
use wfs_harvest::error::HarvestError;
use wfs_harvest::output::{JsonOutput, LogSink};
use wfs_harvest::wfs::WfsHttpClient;

#[derive(Parser)]
#[command(name = "wfs-harvest")]
#[command(about = "Download WFS layers as shapefiles over a GeoJSON footprint and tag them with CODE_LU")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the bounding box of a GeoJSON file")]
    Emprise(EmpriseArgs),
    #[command(about = "Fetch a batch of layers (defaults to the BD TOPO land-use catalogue)")]
    Fetch(FetchArgs),
    #[command(about = "Fetch a single layer; errors are reported instead of skipped")]
    Layer(LayerArgs),
    #[command(about = "List the built-in layer catalogues with their endpoints")]
    Layers,
}

#[derive(Clone, Copy, ValueEnum)]
enum CatalogueArg {
    LandUse,
    Hydrography,
    Agriculture,
    All,
}

impl From<CatalogueArg> for Catalogue {
    fn from(value: CatalogueArg) -> Self {
        match value {
            CatalogueArg::LandUse => Catalogue::LandUse,
            CatalogueArg::Hydrography => Catalogue::Hydrography,
            CatalogueArg::Agriculture => Catalogue::Agriculture,
            CatalogueArg::All => Catalogue::All,
        }
    }
}

#[derive(Args)]
struct EmpriseArgs {
    input: PathBuf,

    #[arg(long, default_value_t = 0.0)]
    buffer: f64,

    #[arg(long)]
    srs: Option<String>,
}

#[derive(Args)]
struct ServiceArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    service_url: Option<String>,

    #[arg(long, default_value_t = 0.0)]
    buffer: f64,

    #[arg(long, default_value = "wfs_harvest_out")]
    out: Utf8PathBuf,
}

#[derive(Args)]
struct FetchArgs {
    input: PathBuf,

    #[arg(long, help = "Comma-separated type names to keep from the catalogue")]
    layers: Option<String>,

    #[arg(long, value_enum, help = "Built-in catalogue replacing the configured layers")]
    catalogue: Option<CatalogueArg>,

    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Args)]
struct LayerArgs {
    input: PathBuf,

    typename: String,

    #[arg(long, default_value_t = 0)]
    code: i64,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::InvalidInput(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::UnknownLayer { .. }
        | HarvestError::DuplicateOutputDir { .. } => 2,
        HarvestError::FetchExhausted { .. }
        | HarvestError::FetchAborted(_)
        | HarvestError::Http(_)
        | HarvestError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Emprise(args) => run_emprise(args),
        Commands::Fetch(args) => run_fetch(args),
        Commands::Layer(args) => run_layer(args),
        Commands::Layers => run_catalogue(),
    }
}

fn run_emprise(args: EmpriseArgs) -> miette::Result<()> {
    let srs = match args.srs {
        Some(value) => value.parse::<SrsName>()?,
        None => SrsName::default(),
    };
    let envelope = envelope_from_path(&args.input, args.buffer, &srs)?;
    JsonOutput::print_envelope(&envelope).into_diagnostic()
}

fn run_fetch(args: FetchArgs) -> miette::Result<()> {
    let mut config = load_config(&args.service)?;
    if let Some(catalogue) = args.catalogue {
        config.use_catalogue(catalogue.into());
    }
    let requests = select_layers(&config.layers, args.layers.as_deref())?;
    let app = build_app(&config)?;
    let report = app.harvest(
        &args.input,
        args.service.buffer,
        &requests,
        &args.service.out,
        &LogSink,
    )?;
    JsonOutput::print_report(&report).into_diagnostic()?;
    print_summary(&report);
    Ok(())
}

fn run_layer(args: LayerArgs) -> miette::Result<()> {
    let config = load_config(&args.service)?;
    let app = build_app(&config)?;
    let envelope = app.envelope(&args.input, args.service.buffer)?;
    let key = args
        .typename
        .rsplit_once(':')
        .map(|(_, local)| local)
        .unwrap_or(&args.typename)
        .to_uppercase();
    let mut request = LayerRequest::new(key, args.typename.clone(), args.code);
    request.service_url = config.service_url.clone();
    let layer_dir = args.service.out.join(request.dir_name());
    let layer = app.fetch_layer(&request, &envelope, &layer_dir, &LogSink)?;
    JsonOutput::print_layer(&layer).into_diagnostic()
}

fn run_catalogue() -> miette::Result<()> {
    let entries = route_layers(Catalogue::All.layers(), None);
    JsonOutput::print_json(&entries).into_diagnostic()
}

fn load_config(args: &ServiceArgs) -> miette::Result<ResolvedConfig> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(url) = &args.service_url {
        config.override_service_url(url);
    }
    Ok(config)
}

fn build_app(config: &ResolvedConfig) -> miette::Result<App<WfsHttpClient>> {
    let client = WfsHttpClient::new(&config.http)?;
    Ok(App::new(client, ServiceParams::from(config)))
}

fn print_summary(report: &HarvestReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    eprintln!(
        "{green}layers fetched: {}{reset}, {yellow}skipped: {}{reset}",
        report.layers.len(),
        report.skipped.len()
    );
    for skip in &report.skipped {
        eprintln!("{yellow}  {} ({}): {}{reset}", skip.key, skip.typename, skip.reason);
    }
}
