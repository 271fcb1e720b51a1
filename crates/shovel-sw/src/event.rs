//! The base extendable event: a type tag, a pending-future list, and a
//! dispatch-phase flag that together implement `waitUntil`/`endDispatch`.
//!
//! Listener dispatch is synchronous (the data model only introduces
//! suspension at `respondWith`/`waitUntil` settlement), so registering
//! a future is a plain synchronous call guarded by a `std::sync::Mutex`
//! — the futures themselves are only awaited later, outside the
//! listener, by `settle_pending_*`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use shovel_common::ShovelError;
use tokio::time::timeout;

pub type Result<T> = shovel_common::Result<T>;

/// A future accepted by `waitUntil`. Boxed because listeners hand in
/// arbitrary async work with no common concrete type.
pub type PendingFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Which ServiceWorker event this is. `Fetch` is carried by
/// [`crate::fetch_event::FetchEvent`], which wraps an `ExtendableEvent`
/// of this kind rather than duplicating the pending-future bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
}

/// Base event type. Tracks pending `waitUntil` futures and the
/// dispatch-phase flag described in the data model: `waitUntil` is
/// accepted while dispatch is in progress, or while futures from an
/// earlier `waitUntil` are still pending (so a future can itself chain
/// more work).
pub struct ExtendableEvent {
    kind: EventKind,
    pending: Mutex<Vec<PendingFuture>>,
    pending_count: AtomicU32,
    dispatch_phase: AtomicBool,
}

impl ExtendableEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            pending: Mutex::new(Vec::new()),
            pending_count: AtomicU32::new(0),
            dispatch_phase: AtomicBool::new(true),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatch_phase.load(Ordering::SeqCst)
    }

    /// Number of futures accepted but not yet settled.
    pub fn pending_count(&self) -> u32 {
        self.pending_count.load(Ordering::SeqCst)
    }

    /// Flip the dispatch-phase flag. Called once the synchronous
    /// listener loop has returned.
    pub fn end_dispatch(&self) {
        self.dispatch_phase.store(false, Ordering::SeqCst);
    }

    /// Accept a future to extend the event's lifetime. Because every
    /// accepted future is eventually drained and awaited by
    /// `settle_pending`, nothing is ever left unobserved the way an
    /// un-awaited promise would be in the host language.
    pub fn wait_until(&self, fut: PendingFuture) -> Result<()> {
        if !(self.is_dispatching() || self.pending_count() > 0) {
            return Err(ShovelError::InvalidState(
                "waitUntil called outside dispatch with no pending work".into(),
            ));
        }
        self.pending_count.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push(fut);
        Ok(())
    }

    /// Await every pending future (including ones queued by a future
    /// that is itself being awaited) up to `budget`, stopping at the
    /// first rejection. Used by install/activate, where a rejection
    /// aborts the lifecycle transition.
    pub async fn settle_pending_strict(&self, budget: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let next = self.pending.lock().unwrap().pop();
            let Some(fut) = next else { break };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let outcome = timeout(remaining, fut).await;
            self.pending_count.fetch_sub(1, Ordering::SeqCst);
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ShovelError::LifecycleTimeout(budget)),
            }
        }
        Ok(())
    }

    /// Await every pending future, logging (not propagating) rejections.
    /// Used by fetch dispatch: a rejected `waitUntil` is reported but
    /// never fails the response.
    pub async fn settle_pending_best_effort(&self, budget: Duration) {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let next = self.pending.lock().unwrap().pop();
            let Some(fut) = next else { break };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let outcome = timeout(remaining, fut).await;
            self.pending_count.fetch_sub(1, Ordering::SeqCst);
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "waitUntil future rejected during fetch"),
                Err(_) => tracing::error!("waitUntil future timed out during fetch"),
            }
        }
    }
}
