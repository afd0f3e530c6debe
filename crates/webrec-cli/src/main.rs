use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webrec_storage::PgOccurrenceStore;
use webrec_sync::{build_fixture_service, build_service_from_env, SyncConfig, SyncRequest};

#[derive(Debug, Parser)]
#[command(name = "webrec-cli")]
#[command(about = "Webinar occurrence reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect, reconcile, and persist every occurrence for an owner.
    Sync {
        #[arg(long, env = "WEBREC_OWNER")]
        owner: Option<String>,
        /// Restrict the run to these webinar ids.
        #[arg(long = "webinar")]
        webinars: Vec<String>,
        /// Run against a captured fixture bundle with an in-memory store.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Retry actual-data fetches for stored rows that lack actual timing.
    Enrich {
        #[arg(long, env = "WEBREC_OWNER")]
        owner: String,
    },
    /// Print the completeness report for an owner's stored occurrences.
    Quality {
        #[arg(long, env = "WEBREC_OWNER")]
        owner: String,
    },
    Migrate,
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        owner: None,
        webinars: Vec::new(),
        fixture: None,
    }) {
        Commands::Sync {
            owner,
            webinars,
            fixture,
        } => {
            let (service, owners) = match fixture {
                Some(path) => {
                    let owner = owner.unwrap_or_else(|| "fixture-owner".to_string());
                    (build_fixture_service(&path, &owner, &config)?, vec![owner])
                }
                None => {
                    let owners = match owner {
                        Some(owner) => vec![owner],
                        None => config.scheduled_owners.clone(),
                    };
                    anyhow::ensure!(
                        !owners.is_empty(),
                        "pass --owner or set WEBREC_SCHEDULED_OWNERS"
                    );
                    (build_service_from_env(&config).await?, owners)
                }
            };
            for owner in owners {
                let mut request = SyncRequest::for_owner(owner);
                request.webinar_ids = webinars.clone();
                let response = service.trigger(request).await?;
                info!(
                    run_id = %response.run_id,
                    status = response.status.as_str(),
                    "sync complete"
                );
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
        Commands::Enrich { owner } => {
            let service = build_service_from_env(&config).await?;
            let response = service.run_enrichment_pass(&owner).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Quality { owner } => {
            let service = build_service_from_env(&config).await?;
            let report = service.quality(&owner).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Migrate => {
            let store = PgOccurrenceStore::connect(&config.database_url)
                .await
                .context("connecting to DATABASE_URL")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            webrec_web::serve_from_env().await?;
        }
    }

    Ok(())
}
