use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tilegrid::{
    AcquisitionOutcome, AreaRequest, CenterPoint, LocalScanOptions, LocalSceneCatalog, LocalStore,
    Pipeline, PipelineConfig, StoreSequence, TransactionFactory,
};

#[derive(Debug, Parser)]
#[command(name = "tilegrid", version, about = "Tile-grid partitioning and mosaic reconstruction")]
struct Cli {
    /// Object store root directory
    #[arg(long, global = true, default_value = "./store")]
    store: PathBuf,

    /// JSON pipeline configuration; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Composite and tile the imagery around a center point
    Acquire {
        /// Scene catalog root directory
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// North-south distance in kilometers
        #[arg(long, default_value_t = 10.0)]
        ns_km: f64,
        /// West-east distance in kilometers
        #[arg(long, default_value_t = 10.0)]
        we_km: f64,
        /// `start/end` date range overriding the configured one
        #[arg(long)]
        datetime: Option<String>,
    },
    /// Upscale the acquisition tiles of a transaction
    Enhance { transaction: String },
    /// Build the mosaics, overlay and statistics of a transaction
    Report { transaction: String },
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "Command failed");
            eprintln!("error[{}]: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> tilegrid::Result<()> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let store = LocalStore::open(&cli.store)?;

    match cli.command {
        Command::Acquire {
            catalog,
            lat,
            lon,
            ns_km,
            we_km,
            datetime,
        } => {
            let request = AreaRequest::new(CenterPoint::new(lat, lon)?, ns_km, we_km)?;
            let options = LocalScanOptions::default().with_collection(config.collection.clone());
            let catalog = LocalSceneCatalog::scan(&catalog, &options)?;
            let transactions =
                TransactionFactory::new(StoreSequence::new(store.clone()), config.counter_key.clone());

            let pipeline = Pipeline::new(config, &store)?;
            match pipeline.acquire(&catalog, &transactions, &request, datetime.as_deref())? {
                AcquisitionOutcome::Completed { transaction, manifest } => {
                    println!(
                        "{transaction}: {} tiles in a {}x{} grid",
                        manifest.tiles.len(),
                        manifest.rows,
                        manifest.cols
                    );
                }
                AcquisitionOutcome::NoData { transaction } => {
                    println!("{transaction}: no scenes matched");
                }
            }
        }
        Command::Enhance { transaction } => {
            let manifest = Pipeline::new(config, &store)?.enhance(&transaction)?;
            println!(
                "{transaction}: {} enhanced tiles in a {}x{} grid",
                manifest.tiles.len(),
                manifest.rows,
                manifest.cols
            );
        }
        Command::Report { transaction } => {
            let report = Pipeline::new(config, &store)?.report(&transaction)?;
            println!("{}", report.overlay_key);
            println!("{}", report.statistics_key);
            println!(
                "{transaction}: {} positive pixels, {:.1} m2",
                report.statistics.positive_pixels(),
                report.statistics.positive_area_m2()
            );
        }
    }
    Ok(())
}
