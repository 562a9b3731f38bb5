//! `query-catalog` - run the MongoDB query catalogue from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use query_catalog::config::CatalogConfig;
use query_catalog::logging::init_logging;
use query_catalog::store::{with_store, DocumentStore, MemoryStore, MongoStore};
use query_catalog::{Catalog, Category, QueryDefinition, QueryReport, QueryRunner, RunSummary};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs a fixed catalogue of MongoDB queries and prints the results as JSON
#[derive(Parser, Debug)]
#[command(name = "query-catalog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "QUERY_CATALOG_CONFIG")]
    config: Option<PathBuf>,

    /// Run against JSON fixtures in this directory instead of MongoDB
    #[arg(long, global = true, env = "QUERY_CATALOG_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// Log level or filter directive; overrides logging.level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// MongoDB connection string; overrides database.url and DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalogue entries
    List {
        #[arg(long, value_enum)]
        category: Option<Category>,
    },
    /// Run the named queries in the given order
    Run {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Run every query, or every query of one category, concurrently
    RunAll {
        #[arg(long, value_enum)]
        category: Option<Category>,
    },
    /// Write a commented sample configuration file
    SampleConfig {
        #[arg(default_value = "query-catalog.toml.example")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::SampleConfig { path } = &cli.command {
        CatalogConfig::generate_sample_config(path)?;
        println!("📝 sample configuration written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = CatalogConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    let _log_guard = init_logging(&config.log_config()?)?;

    let catalog = Catalog::standard();

    let queries: Vec<QueryDefinition> = match &cli.command {
        Command::List { category } => {
            print_catalog(&catalog, *category);
            return Ok(ExitCode::SUCCESS);
        }
        Command::RunAll { category } => match category {
            Some(category) => catalog.by_category(*category),
            None => catalog.queries().to_vec(),
        },
        Command::Run { .. } | Command::SampleConfig { .. } => Vec::new(),
    };

    let store = open_store(&cli, &config).await?;

    let reports = with_store(store, |store| async move {
        let runner = QueryRunner::new(store);
        let reports: query_catalog::Result<Vec<QueryReport>> = match &cli.command {
            Command::Run { names } => {
                let mut reports = Vec::with_capacity(names.len());
                for name in names {
                    reports.push(runner.run_named(&catalog, name).await?);
                }
                Ok(reports)
            }
            _ => Ok(runner.run_all(&queries).await),
        };
        reports
    })
    .await?;

    let output = Value::Array(reports.iter().map(|r| r.to_json()).collect());
    println!("{}", serde_json::to_string_pretty(&output)?);

    let summary = RunSummary::from_reports(&reports);
    if summary.failed > 0 {
        error!("{} of {} queries failed", summary.failed, summary.total);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn open_store(cli: &Cli, config: &CatalogConfig) -> Result<Arc<dyn DocumentStore>> {
    if let Some(dir) = &cli.fixtures {
        let store = MemoryStore::from_fixtures(dir)
            .await
            .with_context(|| format!("loading fixtures from {}", dir.display()))?;
        info!("📦 using in-memory store loaded from {}", dir.display());
        return Ok(Arc::new(store));
    }

    let store = MongoStore::connect(config.mongo_config()).await?;
    match store.ping().await {
        Ok(()) => {
            let version = store
                .server_version()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            info!(
                database = %config.database.name,
                "✅ connected to MongoDB {}",
                version
            );
        }
        Err(e) if config.database.require_connection => {
            return Err(e).context("database connection required but the startup ping failed");
        }
        Err(e) => {
            // Queries will surface the failure individually.
            error!(kind = %e.kind(), "connection error: {}", e);
            warn!("continuing without a confirmed database connection");
        }
    }
    Ok(Arc::new(store))
}

fn print_catalog(catalog: &Catalog, category: Option<Category>) {
    let queries = match category {
        Some(category) => catalog.by_category(category),
        None => catalog.queries().to_vec(),
    };
    for query in queries {
        println!(
            "{:<28} {:<11} {:<8} {:<10} {}",
            query.name,
            query.category,
            query.collection,
            query.operation(),
            query.description
        );
    }
}
