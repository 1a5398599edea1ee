//! The Triggr node binary: opens the store, rebuilds the trigger index,
//! starts chain ingestion and the router, and serves the gateway.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 fatal storage
//! error, 3 socket bind failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use triggr_chain::Ingester;
use triggr_common::Config;
use triggr_node::{build_router, AppState, PubSub, PubSubSink, TriggerRouter};
use triggr_registry::{ProjectRegistry, TriggerRegistry};
use triggr_store::{DocumentStore, KvEngine};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("triggr=info".parse().expect("static directive parses"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e:#}");
            return 1;
        }
    };
    config.log_redacted();

    let kv = match KvEngine::open(&config.data_dir) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            error!(data_dir = %config.data_dir, error = %e, "failed to open storage");
            return 2;
        }
    };

    let pubsub = Arc::new(PubSub::new(config.subscriber_queue_len));
    let docs = Arc::new(DocumentStore::new(
        kv.clone(),
        Arc::new(PubSubSink(pubsub.clone())),
    ));
    let projects = match ProjectRegistry::load(kv.clone()) {
        Ok(projects) => Arc::new(projects),
        Err(e) => {
            error!(error = %e, "failed to load project registry");
            return 2;
        }
    };
    let triggers = Arc::new(TriggerRegistry::new(kv.clone()));

    let router = Arc::new(TriggerRouter::new(
        projects.clone(),
        triggers.clone(),
        docs.clone(),
        Duration::from_millis(config.trigger_budget_ms),
    ));
    if let Err(e) = router.rebuild().await {
        error!(error = %e, "failed to rebuild trigger index");
        return 2;
    }

    let (intake_tx, intake_rx) = mpsc::channel(config.intake_queue_len);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let router_task = tokio::spawn(router.clone().run(intake_rx, shutdown_rx.clone()));

    let ingest_status = if config.chain_url.is_empty() {
        info!("CHAIN_URL not set; chain ingestion disabled");
        None
    } else {
        let ingester = Ingester::new(
            config.chain_url.clone(),
            projects.clone(),
            intake_tx.clone(),
        );
        let status = ingester.status();
        tokio::spawn(ingester.run(shutdown_rx.clone()));
        Some(status)
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        projects,
        triggers,
        docs,
        pubsub,
        router,
        intake_tx,
        ingest_status,
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind listening socket");
            return 3;
        }
    };
    info!("triggr node listening on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = served {
        error!(error = %e, "server error");
    }

    // Drain: stop the ingester and router, then flush the store.
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), router_task).await;
    if let Err(e) = kv.flush().await {
        error!(error = %e, "final storage flush failed");
        return 2;
    }

    info!("clean shutdown");
    0
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received; draining");
}
