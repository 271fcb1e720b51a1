//! One registration per worker: the ServiceWorker state machine, its
//! listener table, and the `install`/`activate`/`dispatch` operations
//! that drive it.

use std::sync::Arc;
use std::time::Duration;

use http::header::SET_COOKIE;
use shovel_common::ShovelError;
use tokio::sync::RwLock;
use url::Url;

use crate::context::{RequestContext, RequestContextValue};
use crate::cookie::CookieJar;
use crate::event::{EventKind, ExtendableEvent};
use crate::fetch_event::{ExtensionHook, FetchEvent};
use crate::request::Request;
use crate::response::Response;

pub type Result<T> = shovel_common::Result<T>;

/// 30s timeout on install/activate pending futures, per the
/// concurrency model.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch dispatch never fails the request for a rejected `waitUntil`,
/// but still bounds how long it will wait for one to settle.
const FETCH_SETTLE_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

pub type InstallListener = Box<dyn Fn(&ExtendableEvent) + Send + Sync>;
pub type ActivateListener = Box<dyn Fn(&ExtendableEvent) + Send + Sync>;
pub type FetchListener = Box<dyn Fn(&FetchEvent) + Send + Sync>;

pub struct Registration {
    state: RwLock<WorkerState>,
    install_listeners: RwLock<Vec<InstallListener>>,
    activate_listeners: RwLock<Vec<ActivateListener>>,
    fetch_listeners: RwLock<Vec<FetchListener>>,
    extension_hook: RwLock<Option<ExtensionHook>>,
    pub script_url: Url,
    pub scope: String,
}

impl Registration {
    pub fn new(script_url: Url, scope: String) -> Self {
        Self {
            state: RwLock::new(WorkerState::Parsed),
            install_listeners: RwLock::new(Vec::new()),
            activate_listeners: RwLock::new(Vec::new()),
            fetch_listeners: RwLock::new(Vec::new()),
            extension_hook: RwLock::new(None),
            script_url,
            scope,
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub async fn set_extension_hook(&self, hook: ExtensionHook) {
        *self.extension_hook.write().await = Some(hook);
    }

    pub async fn add_install_listener(&self, listener: InstallListener) {
        self.install_listeners.write().await.push(listener);
    }

    pub async fn add_activate_listener(&self, listener: ActivateListener) {
        self.activate_listeners.write().await.push(listener);
    }

    pub async fn add_fetch_listener(&self, listener: FetchListener) {
        self.fetch_listeners.write().await.push(listener);
    }

    pub async fn install(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Parsed {
                return Err(ShovelError::InvalidState(format!(
                    "install() called from {:?}",
                    *state
                )));
            }
            *state = WorkerState::Installing;
        }

        let event = ExtendableEvent::new(EventKind::Install);
        {
            let listeners = self.install_listeners.read().await;
            for listener in listeners.iter() {
                listener(&event);
            }
        }
        event.end_dispatch();

        match event.settle_pending_strict(LIFECYCLE_TIMEOUT).await {
            Ok(()) => {
                *self.state.write().await = WorkerState::Installed;
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = WorkerState::Parsed;
                Err(e)
            }
        }
    }

    pub async fn activate(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Installed {
                return Err(ShovelError::InvalidState(format!(
                    "activate() called from {:?}",
                    *state
                )));
            }
            *state = WorkerState::Activating;
        }

        let event = ExtendableEvent::new(EventKind::Activate);
        {
            let listeners = self.activate_listeners.read().await;
            for listener in listeners.iter() {
                listener(&event);
            }
        }
        event.end_dispatch();

        match event.settle_pending_strict(LIFECYCLE_TIMEOUT).await {
            Ok(()) => {
                *self.state.write().await = WorkerState::Activated;
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = WorkerState::Installed;
                Err(e)
            }
        }
    }

    /// Top-level dispatch for a request arriving from the worker
    /// message loop: builds a fresh cookie jar from the request and a
    /// depth-0 context.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        self.require_activated().await?;
        let jar = Arc::new(std::sync::Mutex::new(CookieJar::from_request(&request)));
        let ctx = RequestContextValue { jar, depth: 0 };
        let hook = self.extension_hook.read().await.clone();
        RequestContext::run(ctx.clone(), self.run_fetch(request, ctx, hook)).await
    }

    /// Dispatch for a self-fetch issued from inside a running handler:
    /// reuses the ambient jar and increments the recursion depth.
    pub async fn dispatch_nested(&self, request: Request) -> Result<Response> {
        self.require_activated().await?;
        let current = RequestContext::with_current(|v| v.clone())?;
        let nested = current.nested()?;
        let hook = self.extension_hook.read().await.clone();
        RequestContext::run(nested.clone(), self.run_fetch(request, nested, hook)).await
    }

    async fn require_activated(&self) -> Result<()> {
        let state = self.state().await;
        if state != WorkerState::Activated {
            return Err(ShovelError::InvalidState(format!(
                "dispatch() called from {:?}",
                state
            )));
        }
        Ok(())
    }

    async fn run_fetch(
        &self,
        request: Request,
        ctx: RequestContextValue,
        hook: Option<ExtensionHook>,
    ) -> Result<Response> {
        let event = FetchEvent::new(request, ctx.jar.clone(), hook);

        {
            let listeners = self.fetch_listeners.read().await;
            for listener in listeners.iter() {
                // Listener exceptions are reported, not propagated: only a
                // missing response fails the request.
                listener(&event);
            }
        }
        event.end_dispatch();
        event.base().settle_pending_best_effort(FETCH_SETTLE_BUDGET).await;

        let mut response = match event.take_response().await {
            None => return Err(ShovelError::NoResponse),
            Some(result) => result?,
        };

        let lines = ctx.jar.lock().unwrap().set_cookie_lines();
        for line in lines {
            let value = http::HeaderValue::from_str(&line)
                .map_err(|e| ShovelError::internal(format!("invalid Set-Cookie line: {e}")))?;
            response.append_header(SET_COOKIE, value);
        }
        Ok(response)
    }
}
