//! Sitescope CLI entry point.
//!
//! Wires the provider plugins and the SQLite record store into the
//! enrichment service, runs one request, and prints the response as JSON.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;

use sitescope_core::{
    EnrichmentService, PluginRegistry, RecordStore, SqliteRecordStore,
    model::{EnrichmentMode, EnrichmentRequest, UserValues},
};

const USER_AGENT: &str = concat!("sitescope/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "sitescope", version, about = "Geospatial feasibility enrichment engine")]
struct Cli {
    /// Path to the SQLite record database.
    #[arg(long, default_value = "sitescope.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one enrichment for a subject property
    Enrich {
        /// Application id the record is persisted under
        #[arg(long)]
        application_id: String,
        /// Subject latitude
        #[arg(long)]
        lat: f64,
        /// Subject longitude
        #[arg(long)]
        lng: f64,
        /// Formatted street address
        #[arg(long)]
        address: String,
        /// Pipeline mode
        #[arg(long, value_enum, default_value_t = Mode::Full)]
        mode: Mode,
        /// User-entered lot size in acres, checked against the parcel layer
        #[arg(long)]
        lot_size_acres: Option<f64>,
        /// User-entered zoning code, checked against the zoning layer
        #[arg(long)]
        zoning_code: Option<String>,
        /// User-entered parcel id, checked against the parcel layer
        #[arg(long)]
        parcel_id: Option<String>,
    },
    /// Print a previously persisted record
    Show {
        /// Application id to look up
        application_id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// All registered domains
    Full,
    /// Parcel and zoning identity only
    GeocodeOnly,
}

impl From<Mode> for EnrichmentMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Full => EnrichmentMode::Full,
            Mode::GeocodeOnly => EnrichmentMode::GeocodeOnly,
        }
    }
}

fn build_service(db: &PathBuf) -> anyhow::Result<EnrichmentService> {
    let client = Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent(USER_AGENT)
        .build()
        .context("building HTTP client")?;

    let registry = PluginRegistry::new(vec![
        sitescope_provider_county::parcel_plugin(client.clone()),
        sitescope_provider_county::zoning_plugin(client.clone()),
        sitescope_provider_txdot::plugin(client.clone()),
        sitescope_provider_fema::plugin(client.clone()),
        sitescope_provider_houston::plugin(client.clone()),
        sitescope_provider_epa::plugin(client),
    ]);
    let store = SqliteRecordStore::open(db)
        .with_context(|| format!("opening record store at {}", db.display()))?;

    Ok(EnrichmentService::new(
        Arc::new(registry),
        Arc::new(store) as Arc<dyn RecordStore>,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = build_service(&cli.db)?;

    match cli.command {
        Commands::Enrich {
            application_id,
            lat,
            lng,
            address,
            mode,
            lot_size_acres,
            zoning_code,
            parcel_id,
        } => {
            let user_values = UserValues {
                lot_size_acres,
                zoning_code,
                parcel_id,
            };
            let request = EnrichmentRequest {
                application_id,
                lat,
                lng,
                formatted_address: address,
                mode: mode.into(),
                user_values: (!user_values.is_empty()).then_some(user_values),
            };
            let response = service.enrich(request).await?;
            print_json(&response)?;
        }
        Commands::Show { application_id } => {
            let record = service
                .load(&application_id)
                .await?
                .with_context(|| format!("no record for application {application_id}"))?;
            print_json(&record)?;
        }
    }
    Ok(())
}
