use anyhow::{Context, Result};
use clockface_core::EuclideanMatcher;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod config;
mod directory;
mod extractor;
mod ledger;
mod mirror;
mod service;
mod sink;
mod store;

use crate::extractor::{DescriptorExtractor, RemoteExtractor};
use crate::service::{AttendanceService, ServiceSettings};
use crate::sink::{DisabledSink, ReportSink, SheetsSink};

/// Upper bound on draining queued mirror rows at shutdown.
const MIRROR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("clockfaced starting");

    let config = config::Config::load()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path.display(),
        match_threshold = config.match_threshold,
        descriptor_dim = config.descriptor_dim,
        "configuration loaded"
    );
    if config.uses_default_pin() {
        tracing::warn!("manager PIN is the built-in default; set CLOCKFACE_MANAGER_PIN");
    }

    let store = store::Store::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let sink: Arc<dyn ReportSink> = match &config.spreadsheet_id {
        Some(id) => {
            if config.sheets_token.is_none() {
                tracing::warn!("spreadsheet configured without CLOCKFACE_SHEETS_TOKEN; appends will likely be rejected");
            }
            tracing::info!(spreadsheet_id = %id, range = %config.sheets_range, "report sink enabled");
            Arc::new(SheetsSink::new(
                config.sheets_base_url.clone(),
                id.clone(),
                config.sheets_range.clone(),
                config.sheets_token.clone(),
                config.sink_timeout(),
            )?)
        }
        None => {
            tracing::info!("no spreadsheet configured; report sink disabled");
            Arc::new(DisabledSink)
        }
    };

    let extractor: Option<Arc<dyn DescriptorExtractor>> = match &config.extractor_url {
        Some(url) => {
            tracing::info!(url = %url, "descriptor extractor configured");
            Some(Arc::new(RemoteExtractor::new(
                url.clone(),
                config.extract_timeout(),
            )?))
        }
        None => {
            tracing::info!("no extractor configured; only descriptor input is accepted");
            None
        }
    };

    let (mirror, mirror_worker) = mirror::spawn_mirror(
        sink.clone(),
        config.mirror_queue_capacity,
        config.sink_timeout(),
    );

    let service = AttendanceService::new(
        store,
        Box::new(EuclideanMatcher),
        extractor,
        sink,
        mirror,
        ServiceSettings {
            descriptor_dim: config.descriptor_dim,
            match_threshold: config.match_threshold,
            extract_timeout: config.extract_timeout(),
            sink_timeout: config.sink_timeout(),
        },
    );
    let state = Arc::new(api::AppState {
        service,
        auth: auth::ManagerAuth::new(&config.manager_pin),
    });
    let app = api::router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "clockfaced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("clockfaced shutting down");

    // The router (and with it the last MirrorHandle) is gone; let the worker
    // drain what is queued.
    match tokio::time::timeout(MIRROR_DRAIN_TIMEOUT, mirror_worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "mirror worker failed"),
        Err(_) => tracing::warn!("mirror queue not drained before shutdown"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
