//! Natours - tour catalogue command line

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use natours::{
    config::Config,
    db::{self, repositories::SqlxTourRepository},
    hooks::HookRegistry,
    models::CreateTourInput,
    services::{ListParams, TourService},
};

#[derive(Debug, Parser)]
#[command(name = "natours", about = "Natours tour catalogue", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import tours from a JSON array
    Import {
        file: PathBuf,
    },
    /// List tours
    List(ListArgs),
    /// The five best rated tours
    Top,
    /// Statistics per difficulty over well rated tours
    Stats,
    /// Tour starts per month of a year
    Plan {
        year: String,
    },
    /// Tours starting within a distance of a point
    Within {
        distance: f64,
        /// "lat,lng"
        latlng: String,
        /// mi or km
        unit: String,
    },
    /// Distance from a point to every tour start
    Distances {
        /// "lat,lng"
        latlng: String,
        /// mi or km
        unit: String,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Filter such as `difficulty=easy` or `price[lt]=1000`, repeatable
    #[arg(short, long = "filter", value_parser = parse_key_value)]
    filters: Vec<(String, String)>,

    /// Comma separated sort keys, `-` for descending
    #[arg(long)]
    sort: Option<String>,

    /// Comma separated fields to include, or `-field` to exclude
    #[arg(long)]
    fields: Option<String>,

    #[arg(long)]
    page: Option<usize>,

    #[arg(long)]
    limit: Option<usize>,

    /// Include secret tours
    #[arg(long)]
    include_secret: bool,
}

impl ListArgs {
    fn into_params(self) -> ListParams {
        ListParams {
            filters: self.filters,
            sort: self.sort,
            fields: self.fields,
            page: self.page,
            limit: self.limit,
            include_secret: self.include_secret,
        }
    }
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_env(&cli.config)?;

    // RUST_LOG wins over the configured filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Configuration loaded from {}", cli.config.display());

    let pool = db::create_pool(&config.database).await?;
    pool.ping().await?;
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database ready: {}", config.database.url);

    let hooks = Arc::new(HookRegistry::with_defaults(&config.tours));
    let service = TourService::new(SqlxTourRepository::boxed(pool.clone()), hooks, config.tours.clone());

    match cli.command {
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let inputs: Vec<CreateTourInput> =
                serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", file.display()))?;

            let mut imported = 0usize;
            for input in &inputs {
                match service.create(input).await {
                    Ok(tour) => {
                        imported += 1;
                        tracing::debug!(id = %tour.id, "Imported {}", tour.name);
                    }
                    Err(e) => tracing::warn!(status = e.status_code(), "Skipped tour: {}", e),
                }
            }
            println!("Imported {} of {} tours", imported, inputs.len());
        }
        Commands::List(args) => print_json(&service.get_all(&args.into_params()).await?)?,
        Commands::Top => print_json(&service.top_tours().await?)?,
        Commands::Stats => print_json(&service.get_stats().await?)?,
        Commands::Plan { year } => print_json(&service.get_monthly_plan(&year).await?)?,
        Commands::Within { distance, latlng, unit } => {
            print_json(&service.get_tours_within(distance, &latlng, &unit).await?)?
        }
        Commands::Distances { latlng, unit } => print_json(&service.get_distances(&latlng, &unit).await?)?,
    }

    pool.close().await;
    Ok(())
}
