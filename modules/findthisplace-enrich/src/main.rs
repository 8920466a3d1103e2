use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgGroup, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use findthisplace_common::{EnrichConfig, FtpError, PostScope, RunRecord};
use findthisplace_enrich::{ledger_status, PgStore, Pipeline, RunLedger, Scheduler};

#[derive(Parser)]
#[command(name = "enrich", about = "findthisplace enrichment pipeline")]
#[command(group(ArgGroup::new("mode").required(true).args(["post_ids", "full_run", "daemon"])))]
struct Cli {
    /// Comma-separated post ids for an incremental run
    #[arg(long, value_delimiter = ',')]
    post_ids: Vec<i64>,

    /// Recompute every post once and exit
    #[arg(long)]
    full_run: bool,

    /// Keep running on the background schedule until interrupted
    #[arg(long)]
    daemon: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "ENRICH_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("findthisplace=info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("findthisplace enrich starting...");

    let config = EnrichConfig::from_env()?;

    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("Failed to connect to Postgres")?,
    );
    store.migrate().await.context("Failed to run migrations")?;

    let pipeline = Arc::new(
        Pipeline::from_config(&config, store.clone(), store.clone())
            .context("Failed to build pipeline")?,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    if cli.daemon {
        let scheduler = Arc::new(Scheduler::from_config(pipeline, store, &config));
        scheduler.spawn(cancel).await?;
        return Ok(());
    }

    let scope = if cli.full_run {
        PostScope::All
    } else {
        PostScope::ids(cli.post_ids)
    };

    let run_id = Uuid::new_v4().to_string();
    let result = pipeline.run_with_id(&run_id, &scope, &cancel).await;

    match &result {
        Ok(stats) => info!("Enrichment run complete. {stats}"),
        Err(FtpError::Cancelled) => {}
        Err(e) => error!(error = %e, "Enrichment run failed"),
    }

    // Cancelled runs leave no ledger entry and exit non-zero.
    let Some(status) = ledger_status(&result) else {
        return Err(FtpError::Cancelled.into());
    };

    let record = RunRecord {
        run_id,
        finished_at: Utc::now(),
        status,
    };
    store
        .record_run(&record)
        .await
        .context("Failed to record run status")?;

    result.map(|_| ()).map_err(Into::into)
}
