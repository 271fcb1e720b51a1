//! One-time worker startup: construct the registries and `Registration`,
//! install the global scope, run the entry module's side-effecting
//! registration of listeners, drive `install`/`activate`, announce
//! `Ready`, and hand off to the message loop.

use shovel_registry::{BoxedEntry, DatabaseRegistry, StorageRegistry};
use shovel_sw::Registration;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

use crate::global_scope::{GlobalScope, GlobalScopeInstaller, LoggerEntry, NativeFetch};
use crate::message_loop;
use crate::transport::{Transport, WorkerToSupervisor};

/// Config reification (walking `{module, export, opts}` triples into
/// concrete factories) happens upstream of this crate, in the config
/// reifier; by the time a `WorkerConfig` reaches here, every backend is
/// already a live registry.
pub struct WorkerConfig {
    pub script_url: Url,
    pub scope: String,
    pub caches: Arc<StorageRegistry<BoxedEntry>>,
    pub directories: Arc<StorageRegistry<BoxedEntry>>,
    pub databases: Arc<DatabaseRegistry<BoxedEntry>>,
    pub loggers: Arc<StorageRegistry<LoggerEntry>>,
    pub native_fetch: Arc<dyn NativeFetch>,
}

/// The user's worker script, reduced to its one observable side effect:
/// registering `install`/`activate`/`fetch` listeners through the
/// patched global. A real host loads this from a compiled plugin or a
/// build step; tests and `shovel-cli` supply it directly. Returns a
/// future so registration (which takes an async write lock) can simply
/// be awaited rather than forcing every entry module to block.
pub type EntryModule =
    Box<dyn FnOnce(Arc<GlobalScope>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

pub struct WorkerRuntime;

impl WorkerRuntime {
    /// Runs one worker's full lifecycle: startup through to the message
    /// loop exiting (on `Shutdown` or transport closure). The whole body
    /// runs inside [`GlobalScopeInstaller::run_worker`], so `self` is
    /// valid for every listener the entry module registers.
    pub async fn start(
        config: WorkerConfig,
        entry_module: EntryModule,
        mut transport: impl Transport,
    ) -> shovel_common::Result<()> {
        GlobalScopeInstaller::run_worker(async move {
            let registration = Arc::new(Registration::new(config.script_url, config.scope));
            let global = Arc::new(GlobalScope::new(
                Arc::clone(&registration),
                config.caches,
                config.directories,
                config.databases,
                config.loggers,
                config.native_fetch,
            ));
            GlobalScopeInstaller::install(Arc::clone(&global))?;

            entry_module(Arc::clone(&global)).await;

            registration.install().await?;
            registration.activate().await?;

            transport.send(WorkerToSupervisor::Ready).await?;

            message_loop::run(Arc::clone(&registration), transport).await;

            GlobalScopeInstaller::restore();
            Ok(())
        })
        .await
    }
}
