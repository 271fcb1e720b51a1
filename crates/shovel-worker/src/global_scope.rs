//! The Global Scope Installer: the set of names a worker's entry module
//! sees on `self` — `addEventListener`, `caches`, `directories`,
//! `databases`, `loggers`, `clients`, `cookieStore`, and a `fetch`
//! override — bound for the lifetime of one worker.
//!
//! Rust has no mutable global object to patch, so the "previous value"
//! this installs over and restores is modelled as a
//! `tokio::task_local!` stack, the same mechanism
//! `shovel_sw::context::RequestContext` uses for the per-request jar:
//! `install` pushes the new scope, `restore` pops it, and because the
//! stack itself lives inside the task-local, nested install/restore
//! pairs compose correctly within one worker's single-threaded task.

use async_trait::async_trait;
use shovel_common::logging::CategoryLogger;
use shovel_common::{Result, ShovelError};
use shovel_registry::{BoxedEntry, DatabaseRegistry, StorageEntry, StorageRegistry};
use shovel_sw::{CookieJar, Registration, Request};
use std::cell::RefCell;
use std::sync::Arc;
use url::Url;

/// The host's native fetch implementation, used for absolute-URL fetch
/// calls. A real binary wires in whatever HTTP client it likes; this
/// crate stays free of a concrete client dependency.
#[async_trait]
pub trait NativeFetch: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<shovel_sw::Response>;
}

/// Newtype local to this crate so `CategoryLogger` (defined in
/// `shovel-common`) can satisfy `StorageEntry` (defined in
/// `shovel-registry`) without either crate depending on the other.
pub struct LoggerEntry(pub CategoryLogger);

#[async_trait]
impl StorageEntry for LoggerEntry {
    async fn release(&self) {}
}

impl std::ops::Deref for LoggerEntry {
    type Target = CategoryLogger;
    fn deref(&self) -> &CategoryLogger {
        &self.0
    }
}

/// Inert placeholder for `self.clients` — the data model calls for a
/// stub, since nothing in this runtime's scope ever has more than one
/// client per worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clients;

/// Everything a worker's entry module sees bound to `self`.
pub struct GlobalScope {
    pub registration: Arc<Registration>,
    pub caches: Arc<StorageRegistry<BoxedEntry>>,
    pub directories: Arc<StorageRegistry<BoxedEntry>>,
    pub databases: Arc<DatabaseRegistry<BoxedEntry>>,
    pub loggers: Arc<StorageRegistry<LoggerEntry>>,
    pub clients: Clients,
    native_fetch: Arc<dyn NativeFetch>,
}

impl GlobalScope {
    pub fn new(
        registration: Arc<Registration>,
        caches: Arc<StorageRegistry<BoxedEntry>>,
        directories: Arc<StorageRegistry<BoxedEntry>>,
        databases: Arc<DatabaseRegistry<BoxedEntry>>,
        loggers: Arc<StorageRegistry<LoggerEntry>>,
        native_fetch: Arc<dyn NativeFetch>,
    ) -> Self {
        Self {
            registration,
            caches,
            directories,
            databases,
            loggers,
            clients: Clients,
            native_fetch,
        }
    }

    /// Reads the current request's cookie jar. `None` outside of a fetch
    /// dispatch (install/activate have no request context).
    pub fn cookie_store(&self) -> Option<Arc<std::sync::Mutex<CookieJar>>> {
        shovel_sw::RequestContext::jar().ok()
    }

    /// The `fetch` override from the data model: an absolute URL
    /// delegates to the saved native fetch, a relative one is resolved
    /// against `http://local/` and routed back through this worker's own
    /// `Registration`, carrying the ambient recursion depth along.
    pub async fn fetch(&self, request: GlobalFetchRequest) -> Result<shovel_sw::Response> {
        match Url::parse(&request.url) {
            Ok(absolute) => {
                self.native_fetch
                    .fetch(build_request(absolute, request))
                    .await
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse("http://local/").expect("fixed base parses");
                let joined = base
                    .join(&request.url)
                    .map_err(|e| ShovelError::InvalidArgument(e.to_string()))?;
                self.registration
                    .dispatch_nested(build_request(joined, request))
                    .await
            }
            Err(e) => Err(ShovelError::InvalidArgument(e.to_string())),
        }
    }
}

/// Method/headers/body for a `GlobalScope::fetch` call; the URL is kept
/// as a bare string since only `fetch` itself knows whether to treat it
/// as absolute or relative.
pub struct GlobalFetchRequest {
    pub url: String,
    pub method: http::Method,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
}

fn build_request(url: Url, req: GlobalFetchRequest) -> Request {
    Request::new(req.method, url)
        .with_headers(req.headers)
        .with_body(req.body)
}

tokio::task_local! {
    static SLOT: RefCell<Option<Arc<GlobalScope>>>;
}

/// Binds/unbinds the active [`GlobalScope`] for the calling task. Built
/// on `tokio::task_local!`, the same mechanism `RequestContext` uses for
/// the per-request jar, rather than a plain `thread_local!`: a tokio
/// runtime may resume a task on a different OS thread after an `.await`,
/// and a thread-local would silently lose (or leak across unrelated
/// tasks sharing that thread) a value that must instead follow the
/// worker's task wherever it runs.
pub struct GlobalScopeInstaller;

impl GlobalScopeInstaller {
    /// Wraps a worker's entire task body, giving it a fresh, empty slot.
    /// Must be the outermost call in a worker's task; `install`/
    /// `restore`/`current` panic-safely no-op outside of it.
    pub async fn run_worker<F, T>(body: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        SLOT.scope(RefCell::new(None), body).await
    }

    /// Installs `scope` as current. Global object patching is
    /// process-scoped, so installing twice without an intervening
    /// `restore` is a programmer error and fails fast rather than
    /// stacking originals.
    pub fn install(scope: Arc<GlobalScope>) -> Result<()> {
        SLOT.try_with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(ShovelError::InvalidState(
                    "global scope already installed for this worker".into(),
                ));
            }
            *slot = Some(scope);
            Ok(())
        })
        .map_err(|_| ShovelError::InvalidState("no worker task context to install into".into()))?
    }

    /// Clears the installed scope, if any.
    pub fn restore() {
        let _ = SLOT.try_with(|slot| {
            slot.borrow_mut().take();
        });
    }

    pub fn current() -> Option<Arc<GlobalScope>> {
        SLOT.try_with(|slot| slot.borrow().clone()).ok().flatten()
    }

    pub fn with_current<R>(f: impl FnOnce(&GlobalScope) -> R) -> Result<R> {
        SLOT.try_with(|slot| slot.borrow().as_ref().map(|scope| f(scope)))
            .map_err(|_| ShovelError::InvalidState("no global scope installed".into()))?
            .ok_or_else(|| ShovelError::InvalidState("no global scope installed".into()))
    }
}
