//! `develop`/`build` subcommand bodies: load config, reify its backend
//! sections, stand up a worker pool behind a [`Supervisor`], and either
//! serve it over HTTP (`develop`) or just prove it boots (`build`).

use shovel_common::{Result, ShovelError};
use shovel_config::{reify_database_factory, reify_storage_factory, BackendRegistry, ShovelConfig};
use shovel_registry::{BoxedEntry, DatabaseRegistry, StorageRegistry};
use shovel_supervisor::{Supervisor, SupervisorConfig, WorkerFactory};
use shovel_worker::{ChannelTransport, LoggerEntry, WorkerConfig, WorkerRuntime};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::entry::EntryRegistry;
use crate::native_fetch::ReqwestFetch;

pub async fn load_config(path: &str) -> Result<ShovelConfig> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(ShovelError::Io)?;
    ShovelConfig::from_toml_str(&source)
        .map_err(|e| ShovelError::ConfigInvalid(format!("{path}: {e}")))
}

/// Builds the shared, memoised registries every worker's `WorkerConfig`
/// points at. Empty `BackendRegistry`s ship by default — a deployment
/// links its own backend crates and populates these before calling in,
/// which is out of scope for this binary's own default entry module.
fn build_registries(
    config: &ShovelConfig,
) -> (
    Arc<StorageRegistry<BoxedEntry>>,
    Arc<StorageRegistry<BoxedEntry>>,
    Arc<DatabaseRegistry<BoxedEntry>>,
) {
    let cache_registry: Arc<BackendRegistry<BoxedEntry>> = Arc::new(BackendRegistry::new());
    let caches = Arc::new(StorageRegistry::new(reify_storage_factory(
        config.caches.clone(),
        cache_registry,
    )));

    let directory_registry: Arc<BackendRegistry<BoxedEntry>> = Arc::new(BackendRegistry::new());
    let directories = Arc::new(StorageRegistry::new(reify_storage_factory(
        config.directories.clone(),
        directory_registry,
    )));

    let database_registry: Arc<BackendRegistry<BoxedEntry>> = Arc::new(BackendRegistry::new());
    let databases = Arc::new(DatabaseRegistry::new(reify_database_factory(
        config.databases.clone(),
        database_registry,
    )));

    (caches, directories, databases)
}

fn build_loggers() -> Arc<StorageRegistry<LoggerEntry>> {
    Arc::new(StorageRegistry::new(Box::new(|name: &str| {
        Ok(LoggerEntry(shovel_common::CategoryLogger::new(&[
            name.to_string(),
        ])))
    })))
}

fn worker_factory(
    script_url: Url,
    caches: Arc<StorageRegistry<BoxedEntry>>,
    directories: Arc<StorageRegistry<BoxedEntry>>,
    databases: Arc<DatabaseRegistry<BoxedEntry>>,
    loggers: Arc<StorageRegistry<LoggerEntry>>,
    entry_name: String,
    entries: Arc<EntryRegistry>,
) -> WorkerFactory {
    Box::new(move || {
        let script_url = script_url.clone();
        let caches = Arc::clone(&caches);
        let directories = Arc::clone(&directories);
        let databases = Arc::clone(&databases);
        let loggers = Arc::clone(&loggers);
        let entry_name = entry_name.clone();
        let entries = Arc::clone(&entries);

        let fut: Pin<Box<dyn Future<Output = Result<shovel_worker::SupervisorChannel>> + Send>> =
            Box::pin(async move {
                let entry = entries.get(&entry_name)?;
                let native_fetch = ReqwestFetch::new()?;
                let config = WorkerConfig {
                    script_url,
                    scope: "/".to_string(),
                    caches,
                    directories,
                    databases,
                    loggers,
                    native_fetch: Arc::new(native_fetch),
                };

                let (worker_transport, supervisor_channel) = ChannelTransport::pair(256);
                tokio::spawn(async move {
                    if let Err(e) = WorkerRuntime::start(config, entry, worker_transport).await {
                        tracing::error!(error = %e, "worker exited with an error");
                    }
                });
                Ok(supervisor_channel)
            });
        fut
    })
}

/// `shovel build <entry>`: loads the config, resolves the entry module,
/// and starts exactly one worker long enough to confirm
/// install/activate succeed, then shuts it down. No bundling step; this
/// runtime has no client-side assets to emit.
pub async fn build(config_path: &str, entry_name: &str) -> Result<()> {
    let config = load_config(config_path).await?;
    let (caches, directories, databases) = build_registries(&config);
    let loggers = build_loggers();
    let entries = Arc::new(EntryRegistry::new());

    let factory = worker_factory(
        Url::parse("http://local/sw.js").map_err(|e| ShovelError::ConfigInvalid(e.to_string()))?,
        caches,
        directories,
        databases,
        loggers,
        entry_name.to_string(),
        entries,
    );

    let supervisor = Supervisor::start(SupervisorConfig::default(), factory, 1).await?;
    info!("build check passed: entry module installs and activates cleanly");
    supervisor.shutdown().await;
    Ok(())
}

/// `shovel develop <entry>`: the same startup as `build`, but with a
/// full worker pool and an HTTP listener in front of it, running until
/// interrupted.
pub async fn develop(config_path: &str, entry_name: &str) -> Result<()> {
    let config = load_config(config_path).await?;
    let (caches, directories, databases) = build_registries(&config);
    let loggers = build_loggers();
    let entries = Arc::new(EntryRegistry::new());

    let factory = worker_factory(
        Url::parse("http://local/sw.js").map_err(|e| ShovelError::ConfigInvalid(e.to_string()))?,
        caches,
        directories,
        databases,
        loggers,
        entry_name.to_string(),
        entries,
    );

    let supervisor = Supervisor::start(SupervisorConfig::default(), factory, config.workers).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ShovelError::Io)?;
    info!(%addr, workers = config.workers, "listening");

    let router = crate::listener::router(Arc::clone(&supervisor));
    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    serve.await.map_err(ShovelError::Io)?;

    supervisor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining in-flight requests");
}
