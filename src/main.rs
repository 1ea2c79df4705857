//! Discovery image service.
//!
//! Downloads the RHCOS live ISO and rootfs for every configured release into a
//! local cache, then serves the ISO to provisioning clients at
//! `/images/{cluster_id}`. The listener is only bound once every artifact is
//! cached; any startup failure aborts the process.

mod catalog;
mod config;
mod fetch;
mod resolver;
mod server;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use catalog::ReleaseCatalog;
use config::{Config, ConfigError, ResolverKind};
use resolver::{ServiceResolver, StaticResolver, VersionResolver};
use server::AppState;
use store::ImageStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env().context("failed to process config")?;

    let catalog = match &config.versions {
        Some(json) => ReleaseCatalog::from_json_str(json),
        None => ReleaseCatalog::defaults(),
    }
    .context("failed to build release catalog")?;
    info!(
        versions = ?catalog.versions().collect::<Vec<_>>(),
        data_dir = %config.data_dir.display(),
        listen_addr = %config.listen_addr,
        "Configuration loaded"
    );
    let catalog = Arc::new(catalog);

    let resolver = build_resolver(&config, &catalog)?;

    let store = Arc::new(
        ImageStore::new(&config, Arc::clone(&catalog)).context("failed to create image store")?,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    // Population strictly precedes serving.
    populate_within(&store, config.fetch.populate_timeout, &shutdown).await?;

    let app = server::create_router(AppState::new(store, resolver, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Starting http handler");

    server::serve(listener, app, shutdown, config.shutdown_grace)
        .await
        .context("http server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Run `populate` under `deadline`.
///
/// On expiry the in-flight fetches are cancelled and allowed to clean up
/// before the error is returned.
async fn populate_within(
    store: &ImageStore,
    deadline: Duration,
    shutdown: &CancellationToken,
) -> Result<()> {
    let cancel = shutdown.child_token();
    let populate = store.populate(&cancel);
    tokio::pin!(populate);

    tokio::select! {
        result = &mut populate => result.context("failed to populate image store"),
        _ = tokio::time::sleep(deadline) => {
            cancel.cancel();
            let _ = populate.await;
            bail!("image store was not populated within {}s", deadline.as_secs());
        }
    }
}

fn build_resolver(config: &Config, catalog: &ReleaseCatalog) -> Result<Arc<dyn VersionResolver>> {
    match config.resolver {
        ResolverKind::Static => {
            if !catalog.contains(&config.default_version) {
                return Err(ConfigError::UnknownVersion(config.default_version.clone()).into());
            }
            info!(version = %config.default_version, "Serving a fixed release to every cluster");
            Ok(Arc::new(StaticResolver::new(config.default_version.clone())))
        }
        ResolverKind::Service => {
            info!(
                url = %config.assisted_service_url,
                "Resolving cluster releases through the assisted service"
            );
            let resolver = ServiceResolver::new(
                config.assisted_service_url.clone(),
                catalog.versions().map(String::from).collect(),
            )?;
            Ok(Arc::new(resolver))
        }
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Received shutdown signal");
    shutdown.cancel();
}
