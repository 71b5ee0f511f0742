//! docsmith worker

use anyhow::Context;
use clap::Parser;
use docsmith_cdn::{CdnInvalidator, FastlyClient};
use docsmith_config::load_config;
use docsmith_core::notify::Notifier;
use docsmith_db::{PgEntitlementRepo, PgJobStore, PgRepoBranchesRepo, create_pool, run_migrations};
use docsmith_executor::{GitCli, LocalCommandRunner};
use docsmith_scheduler::{
    HandlerContext, HandlerSettings, JobQueue, JobValidator, Worker, WorkerSettings, WorkerState,
};
use docsmith_worker::services::{LogNotifier, SlackNotifier};
use docsmith_worker::{AppState, routes, telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "docsmith-worker")]
#[command(about = "Builds and publishes documentation jobs from the shared queue", long_about = None)]
#[command(version)]
struct Cli {
    /// KDL configuration file; defaults apply when omitted.
    #[arg(short, long, env = "DOCSMITH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    telemetry::init(config.log.format);

    info!(worker_id = %config.worker.id, "Connecting to job store...");
    let pool = create_pool(
        &config.store.url,
        config.store.max_connections,
        config.store.timeout,
    )
    .await
    .context("failed to connect to the job store")?;
    run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    info!("Job store connected");

    let queue = Arc::new(JobQueue::new(
        Arc::new(PgJobStore::new(pool.clone())),
        config.store.timeout,
    ));
    let worker_state = Arc::new(WorkerState::new());
    worker_state.set_store_ready(true);

    let validator = Arc::new(JobValidator::new(
        Arc::new(PgEntitlementRepo::new(pool.clone())),
        Arc::new(PgRepoBranchesRepo::new(pool)),
    ));

    let cdn = FastlyClient::from_config(&config.cdn)?.map(|client| {
        Arc::new(CdnInvalidator::new(Arc::new(client), config.cdn.purge_mode))
    });
    if cdn.is_none() {
        warn!("No CDN credentials configured; cache invalidation is disabled");
    }

    let notifier: Arc<dyn Notifier> = match &config.notify.slack_webhook {
        Some(webhook) => Arc::new(SlackNotifier::new(webhook.clone())?),
        None => Arc::new(LogNotifier),
    };
    info!(notifier = notifier.name(), "Notifications configured");

    let ctx = Arc::new(HandlerContext {
        queue: queue.clone(),
        runner: Arc::new(LocalCommandRunner::new(config.commands.timeout)),
        source: Arc::new(GitCli::new(
            &config.worker.workspace,
            config.commands.git_token.clone(),
        )),
        notifier,
        cdn,
        settings: HandlerSettings::from_config(&config),
    });
    let worker = Worker::new(
        config.worker.id.clone(),
        validator,
        ctx,
        worker_state.clone(),
        WorkerSettings::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = routes::router(AppState::new(
        worker_state,
        queue,
        config.worker.staleness,
    ))
    .layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(&config.health.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.health.bind))?;
    info!("Health probes listening on {}", config.health.bind);

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    server.await?.context("health server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
