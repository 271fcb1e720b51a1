//! Fetch event: extends [`ExtendableEvent`] with the incoming request,
//! a write-once response slot, and the platform extension hook.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shovel_common::ShovelError;
use tokio::sync::oneshot;
use url::Url;

use crate::cookie::CookieJar;
use crate::event::{EventKind, ExtendableEvent, PendingFuture};
use crate::request::Request;
use crate::response::Response;

pub type Result<T> = shovel_common::Result<T>;

pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// Invoked from `waitUntil` (including the implicit one inside
/// `respondWith`) before the base implementation runs, so the host
/// listener can extend its own request lifetime alongside the event's.
pub type ExtensionHook = Arc<dyn Fn() + Send + Sync>;

pub struct FetchEvent {
    base: ExtendableEvent,
    request: Request,
    jar: Arc<Mutex<CookieJar>>,
    responded: AtomicBool,
    response_rx: Mutex<Option<oneshot::Receiver<Result<Response>>>>,
    extension_hook: Option<ExtensionHook>,
}

impl FetchEvent {
    pub fn new(
        request: Request,
        jar: Arc<Mutex<CookieJar>>,
        extension_hook: Option<ExtensionHook>,
    ) -> Self {
        Self {
            base: ExtendableEvent::new(EventKind::Fetch),
            request,
            jar,
            responded: AtomicBool::new(false),
            response_rx: Mutex::new(None),
            extension_hook,
        }
    }

    pub fn url(&self) -> &Url {
        &self.request.url
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn jar(&self) -> &Arc<Mutex<CookieJar>> {
        &self.jar
    }

    pub fn is_dispatching(&self) -> bool {
        self.base.is_dispatching()
    }

    pub fn end_dispatch(&self) {
        self.base.end_dispatch()
    }

    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    pub fn base(&self) -> &ExtendableEvent {
        &self.base
    }

    /// `waitUntil`, routed through the platform extension hook first.
    /// Synchronous: it only registers the future, it doesn't await it.
    pub fn wait_until(&self, fut: PendingFuture) -> Result<()> {
        if let Some(hook) = &self.extension_hook {
            hook();
        }
        self.base.wait_until(fut)
    }

    /// Sets the response slot and extends the event's lifetime to cover
    /// it. A second call fails with `AlreadyResponded`.
    pub fn respond_with(&self, fut: ResponseFuture) -> Result<()> {
        if !self.is_dispatching() {
            return Err(ShovelError::InvalidState(
                "respondWith called outside dispatch".into(),
            ));
        }
        if self
            .responded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ShovelError::AlreadyResponded);
        }

        let (tx, rx) = oneshot::channel();
        *self.response_rx.lock().unwrap() = Some(rx);

        let wrapped: PendingFuture = Box::pin(async move {
            let result = fut.await;
            if let Err(ref e) = result {
                tracing::error!(error = %e, "respondWith future rejected");
            }
            let _ = tx.send(result);
            // Rejections are reported above; they never fail the fetch
            // event's own lifetime extension (only a missing response does).
            Ok(())
        });
        self.wait_until(wrapped)
    }

    /// Consumes the response slot. Returns `None` if `respondWith` was
    /// never called.
    pub async fn take_response(&self) -> Option<Result<Response>> {
        let rx = self.response_rx.lock().unwrap().take()?;
        Some(
            rx.await
                .unwrap_or_else(|_| Err(ShovelError::internal("response sender dropped"))),
        )
    }
}
