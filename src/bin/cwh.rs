use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use directories::BaseDirs;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use content_warehouse::catalog::Catalog;
use content_warehouse::error::WarehouseError;
use content_warehouse::events::Listener;
use content_warehouse::manifest::ManifestHttpClient;
use content_warehouse::output::{DownloadResult, JsonOutput, PurgeResult, RefreshResult};
use content_warehouse::request::{Request, load_requests};
use content_warehouse::source::SourceRegistry;
use content_warehouse::transport::{HttpTransport, HttpTransportFactory};
use content_warehouse::warehouse::Warehouse;

#[derive(Parser)]
#[command(name = "cwh")]
#[command(about = "Alternate content source download orchestrator")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Refresh the content catalog from registered sources")]
    Refresh(RefreshArgs),
    #[command(about = "Download a request list via alternate content sources")]
    Download(DownloadArgs),
    #[command(about = "Purge expired and orphaned catalog entries")]
    Purge(PurgeArgs),
}

#[derive(Args)]
struct RefreshArgs {
    #[arg(long, help = "Directory of content source descriptor files")]
    sources: PathBuf,

    #[arg(long, help = "Catalog file (defaults to the user cache dir)")]
    catalog: Option<Utf8PathBuf>,

    #[arg(long, help = "Refresh sources even if their catalog entries are fresh")]
    force: bool,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long, help = "Directory of content source descriptor files")]
    sources: PathBuf,

    #[arg(long, help = "JSON request list: [{unit, url, destination}]")]
    requests: PathBuf,

    #[arg(long, help = "Catalog file (defaults to the user cache dir)")]
    catalog: Option<Utf8PathBuf>,

    #[arg(long, help = "Directory request destinations resolve against")]
    dest_dir: Option<PathBuf>,

    #[arg(long, help = "Concurrent transfers for the primary source")]
    concurrent: Option<usize>,
}

#[derive(Args)]
struct PurgeArgs {
    #[arg(long, help = "Directory of content source descriptor files")]
    sources: PathBuf,

    #[arg(long, help = "Catalog file (defaults to the user cache dir)")]
    catalog: Option<Utf8PathBuf>,
}

struct ConsoleListener;

impl Listener for ConsoleListener {
    fn download_started(&self, request: &Request) {
        tracing::info!(unit = %request.unit_key(), "download started");
    }

    fn download_succeeded(&self, request: &Request) {
        tracing::info!(unit = %request.unit_key(), "download succeeded");
    }

    fn download_failed(&self, request: &Request) {
        tracing::warn!(
            unit = %request.unit_key(),
            attempts = request.errors().len(),
            "download failed on every source"
        );
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(warehouse) = report.downcast_ref::<WarehouseError>() {
            return ExitCode::from(map_exit_code(warehouse));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &WarehouseError) -> u8 {
    match error {
        WarehouseError::DescriptorDir(_)
        | WarehouseError::DescriptorParse { .. }
        | WarehouseError::DescriptorBaseUrl { .. }
        | WarehouseError::DuplicateSource(_)
        | WarehouseError::InvalidSourceId(_)
        | WarehouseError::InvalidUnitKey(_)
        | WarehouseError::CatalogRead(_)
        | WarehouseError::CatalogParse(_)
        | WarehouseError::RequestListRead(_)
        | WarehouseError::RequestListParse(_) => 2,
        WarehouseError::ManifestHttp(_)
        | WarehouseError::ManifestStatus { .. }
        | WarehouseError::ManifestParse { .. }
        | WarehouseError::TransportInit(_)
        | WarehouseError::TransportSetup { .. } => 3,
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
        Commands::Refresh(args) => run_refresh(args),
        Commands::Download(args) => run_download(args),
        Commands::Purge(args) => run_purge(args),
    }
}

fn catalog_path(arg: Option<Utf8PathBuf>) -> miette::Result<Utf8PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("content-warehouse")
                    .join("catalog.json"),
            )
            .ok()
        })
        .ok_or_else(|| miette::Report::msg("unable to resolve catalog directory"))
}

fn open_warehouse(
    sources: &Path,
    catalog: Option<Utf8PathBuf>,
) -> miette::Result<Warehouse<ManifestHttpClient, HttpTransportFactory>> {
    let registry = SourceRegistry::load_all(sources).into_diagnostic()?;
    let catalog = Catalog::load(&catalog_path(catalog)?).into_diagnostic()?;
    let manifest = ManifestHttpClient::new().into_diagnostic()?;
    Ok(Warehouse::new(registry, catalog, manifest, HttpTransportFactory))
}

fn run_refresh(args: RefreshArgs) -> miette::Result<()> {
    let warehouse = open_warehouse(&args.sources, args.catalog)?;
    let reports = warehouse.refresh(args.force);
    warehouse.persist().into_diagnostic()?;

    let failed = reports.iter().filter(|report| !report.succeeded()).count();
    let result = RefreshResult {
        reports,
        catalog_entries: warehouse.catalog_entry_count(),
    };
    JsonOutput::print_refresh(&result).into_diagnostic()?;
    if failed > 0 {
        return Err(miette::Report::msg(format!(
            "{failed} source(s) failed to refresh"
        )));
    }
    Ok(())
}

fn run_download(args: DownloadArgs) -> miette::Result<()> {
    let warehouse = open_warehouse(&args.sources, args.catalog)?
        .with_listener(Box::new(ConsoleListener));

    let dest_dir = args
        .dest_dir
        .unwrap_or_else(|| PathBuf::from("."));
    let mut requests = load_requests(&args.requests, &dest_dir).into_diagnostic()?;

    let primary = HttpTransport::new(args.concurrent.unwrap_or(1)).into_diagnostic()?;
    warehouse.download(&primary, &mut requests);
    warehouse.persist().into_diagnostic()?;

    let result = DownloadResult::from_requests(&requests);
    JsonOutput::print_download(&result).into_diagnostic()?;
    if result.failed > 0 {
        return Err(miette::Report::msg(format!(
            "{} of {} request(s) failed",
            result.failed,
            result.items.len()
        )));
    }
    Ok(())
}

fn run_purge(args: PurgeArgs) -> miette::Result<()> {
    let warehouse = open_warehouse(&args.sources, args.catalog)?;
    let entries_before = warehouse.catalog_entry_count();
    warehouse.purge_orphans();
    warehouse.purge_expired();
    warehouse.persist().into_diagnostic()?;

    let result = PurgeResult {
        entries_before,
        entries_after: warehouse.catalog_entry_count(),
    };
    JsonOutput::print_purge(&result).into_diagnostic()?;
    Ok(())
}
