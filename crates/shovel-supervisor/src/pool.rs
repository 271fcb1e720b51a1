//! The supervisor: a pool of workers, a request-id correlation map, and
//! the least-busy dispatch policy, health tracking, and graceful
//! shutdown described for it.
//!
//! An `RwLock`-guarded collection of worker handles plus a background
//! task per worker forwarding its inbound messages, generalised from
//! plain lifecycle events to request/response correlation by id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shovel_common::{retry_with_backoff, Result, RetryConfig, ShovelError};
use shovel_worker::{SupervisorChannel, SupervisorToWorker, WireRequest, WireResponse, WorkerToSupervisor};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Builds a freshly started worker and hands back the supervisor-facing
/// half of its transport. Owning the entry module, config, and the
/// worker task's `tokio::spawn` is the caller's job (`shovel-cli`); the
/// supervisor only ever sees the channel it talks over.
pub type WorkerFactory =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<SupervisorChannel>> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Per-worker in-flight cap before a request is considered for the
    /// overflow queue.
    pub per_worker_cap: usize,
    /// Total overflow slots across the whole pool before `dispatch`
    /// fails fast with `Overloaded`.
    pub overflow_high_water_mark: usize,
    /// Restarts allowed per worker slot before it's given up on.
    pub max_restarts: u32,
    /// How long `shutdown` waits for in-flight requests to drain.
    pub shutdown_grace: Duration,
    /// Backoff applied across the attempts `factory()` gets within a
    /// single restart, so a transient failure to stand the replacement
    /// worker back up doesn't immediately burn through `max_restarts`.
    pub restart_backoff: RetryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            per_worker_cap: 256,
            overflow_high_water_mark: 1024,
            max_restarts: 3,
            shutdown_grace: Duration::from_secs(30),
            restart_backoff: RetryConfig::default(),
        }
    }
}

struct WorkerSlot {
    tx: Mutex<tokio::sync::mpsc::Sender<SupervisorToWorker>>,
    in_flight: AtomicUsize,
    restarts: AtomicUsize,
    alive: std::sync::atomic::AtomicBool,
}

type PendingMap = HashMap<u64, (usize, oneshot::Sender<Result<WireResponse>>)>;

pub struct Supervisor {
    config: SupervisorConfig,
    factory: WorkerFactory,
    workers: RwLock<Vec<Arc<WorkerSlot>>>,
    pending: Mutex<PendingMap>,
    next_id: AtomicU64,
    overflow: Arc<AtomicUsize>,
    drained: Notify,
    accepting: std::sync::atomic::AtomicBool,
}

impl Supervisor {
    /// Starts `worker_count` workers via `factory` and spawns a reader
    /// task per worker that resolves pending slots as replies arrive.
    pub async fn start(
        config: SupervisorConfig,
        factory: WorkerFactory,
        worker_count: usize,
    ) -> Result<Arc<Self>> {
        let supervisor = Arc::new(Self {
            config,
            factory,
            workers: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            overflow: Arc::new(AtomicUsize::new(0)),
            drained: Notify::new(),
            accepting: std::sync::atomic::AtomicBool::new(true),
        });

        for _ in 0..worker_count {
            supervisor.clone().spawn_worker().await?;
        }

        Ok(supervisor)
    }

    async fn spawn_worker(self: Arc<Self>) -> Result<usize> {
        let channel = (self.factory)().await?;
        let slot = Arc::new(WorkerSlot {
            tx: Mutex::new(channel.tx),
            in_flight: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            alive: std::sync::atomic::AtomicBool::new(true),
        });

        let mut workers = self.workers.write().await;
        let index = workers.len();
        workers.push(slot);
        drop(workers);

        self.clone().spawn_reader(index, channel.rx);
        Ok(index)
    }

    fn spawn_reader(self: Arc<Self>, index: usize, mut rx: tokio::sync::mpsc::Receiver<WorkerToSupervisor>) {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WorkerToSupervisor::Ready => {
                        info!(worker = index, "worker ready");
                    }
                    WorkerToSupervisor::Response(resp) => {
                        self.resolve(index, resp.id, Ok(resp)).await;
                    }
                    WorkerToSupervisor::Error(err) => {
                        if let Some(id) = err.id {
                            self.resolve(index, id, Err(ShovelError::internal(err.message)))
                                .await;
                        } else {
                            warn!(worker = index, message = %err.message, "worker-level error");
                        }
                    }
                }
            }
            self.on_worker_lost(index).await;
        });
    }

    async fn resolve(&self, index: usize, id: u64, result: Result<WireResponse>) {
        let slot = {
            let mut pending = self.pending.lock().await;
            pending.remove(&id)
        };
        match slot {
            Some((owner, tx)) if owner == index => {
                self.release_slot(index).await;
                let _ = tx.send(result);
            }
            Some((owner, tx)) => {
                // Reinsert: this id belongs to a different worker than
                // the one that just reported it, which should not
                // happen but must not silently drop a caller's reply.
                let mut pending = self.pending.lock().await;
                pending.insert(id, (owner, tx));
                warn!(id, reported_by = index, owner, "response id/worker mismatch");
            }
            None => {
                warn!(id, worker = index, "dropping response for unknown request id");
            }
        }
        self.notify_if_drained().await;
    }

    async fn release_slot(&self, index: usize) {
        if let Some(slot) = self.workers.read().await.get(index) {
            slot.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn notify_if_drained(&self) {
        if self.pending.lock().await.is_empty() {
            self.drained.notify_waiters();
        }
    }

    async fn on_worker_lost(self: Arc<Self>, index: usize) {
        error!(worker = index, "worker channel closed, marking requests lost");

        if let Some(slot) = self.workers.read().await.get(index) {
            slot.alive.store(false, Ordering::SeqCst);
        }

        let lost: Vec<_> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, (owner, _))| *owner == index)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|(_, tx)| tx))
                .collect()
        };
        for tx in lost {
            let _ = tx.send(Err(ShovelError::WorkerLost(format!(
                "worker {index} disappeared"
            ))));
        }
        self.notify_if_drained().await;

        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        let restarts = self.workers.read().await[index]
            .restarts
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        if restarts as u32 > self.config.max_restarts {
            error!(worker = index, restarts, "worker exhausted restart budget, giving up");
            return;
        }

        let factory = &self.factory;
        match retry_with_backoff(&self.config.restart_backoff, || factory()).await {
            Ok(channel) => {
                let fresh = Arc::new(WorkerSlot {
                    tx: Mutex::new(channel.tx),
                    in_flight: AtomicUsize::new(0),
                    restarts: AtomicUsize::new(restarts),
                    alive: std::sync::atomic::AtomicBool::new(true),
                });
                self.workers.write().await[index] = fresh;
                self.spawn_reader(index, channel.rx);
                info!(worker = index, restarts, "worker restarted");
            }
            Err(e) => {
                error!(worker = index, error = %e, "failed to restart worker");
            }
        }
    }

    /// Dispatches one request to the least-busy live worker (ties broken
    /// by index), waiting for its reply. Fails fast with `Overloaded`
    /// once every worker is at its per-worker cap and the overflow queue
    /// is itself full.
    pub async fn dispatch(&self, mut request: WireRequest) -> Result<WireResponse> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ShovelError::InvalidState("supervisor is shutting down".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        request.id = id;

        let index = self.pick_worker().await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, (index, tx));
        }

        let slot = Arc::clone(&self.workers.read().await[index]);
        slot.in_flight.fetch_add(1, Ordering::SeqCst);

        let send_result = slot
            .tx
            .lock()
            .await
            .send(SupervisorToWorker::Request(request))
            .await;
        if send_result.is_err() {
            self.pending.lock().await.remove(&id);
            slot.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(ShovelError::WorkerLost(format!("worker {index} channel closed")));
        }

        rx.await
            .map_err(|_| ShovelError::WorkerLost(format!("worker {index} dropped the response slot")))?
    }

    async fn pick_worker(&self) -> Result<usize> {
        let workers = self.workers.read().await;
        let best = workers
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive.load(Ordering::SeqCst))
            .filter(|(_, slot)| slot.in_flight.load(Ordering::SeqCst) < self.config.per_worker_cap)
            .min_by_key(|(_, slot)| slot.in_flight.load(Ordering::SeqCst));

        if let Some((index, _)) = best {
            return Ok(index);
        }
        drop(workers);

        let prior = self.overflow.fetch_add(1, Ordering::SeqCst);
        if prior >= self.config.overflow_high_water_mark {
            self.overflow.fetch_sub(1, Ordering::SeqCst);
            return Err(ShovelError::Overloaded);
        }

        // Every worker is saturated; wait for one to free a slot rather
        // than reject outright, since we're still under the high-water
        // mark.
        loop {
            self.drained.notified().await;
            let workers = self.workers.read().await;
            if let Some((index, _)) = workers
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.alive.load(Ordering::SeqCst))
                .filter(|(_, slot)| slot.in_flight.load(Ordering::SeqCst) < self.config.per_worker_cap)
                .min_by_key(|(_, slot)| slot.in_flight.load(Ordering::SeqCst))
            {
                self.overflow.fetch_sub(1, Ordering::SeqCst);
                return Ok(index);
            }
        }
    }

    /// Stops accepting new dispatches, waits up to the configured grace
    /// period for in-flight requests to drain, then sends `Shutdown` to
    /// every worker.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let wait = async {
            while !self.pending.lock().await.is_empty() {
                self.drained.notified().await;
            }
        };
        if timeout(self.config.shutdown_grace, wait).await.is_err() {
            warn!("shutdown grace period elapsed with requests still in flight");
        }

        for slot in self.workers.read().await.iter() {
            let _ = slot.tx.lock().await.send(SupervisorToWorker::Shutdown).await;
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn in_flight(&self, index: usize) -> usize {
        self.workers.read().await[index].in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shovel_worker::{ChannelTransport, WireResponse};
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    /// A fake worker: echoes a 200 response back for every request it
    /// receives, and holds the reply until `release` fires so tests can
    /// control how long a request stays in flight.
    fn spawn_fake_worker() -> WorkerFactory {
        let counter = Arc::new(StdAtomicUsize::new(0));
        Box::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (mut transport, supervisor_side) = ChannelTransport::pair(64);
                tokio::spawn(async move {
                    use shovel_worker::Transport;
                    loop {
                        match transport.recv().await {
                            Some(SupervisorToWorker::Request(req)) => {
                                let _ = transport
                                    .send(WorkerToSupervisor::Response(WireResponse {
                                        id: req.id,
                                        status: http::StatusCode::OK,
                                        status_text: "OK".into(),
                                        headers: http::HeaderMap::new(),
                                        body: bytes::Bytes::from(format!("worker-{n}")),
                                    }))
                                    .await;
                            }
                            Some(SupervisorToWorker::Shutdown) | None => return,
                        }
                    }
                });
                Ok(supervisor_side)
            })
        })
    }

    fn sample_request() -> WireRequest {
        WireRequest {
            id: 0,
            method: http::Method::GET,
            url: "http://local/a".into(),
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_round_trips_through_a_worker() {
        let supervisor = Supervisor::start(SupervisorConfig::default(), spawn_fake_worker(), 2)
            .await
            .unwrap();

        let response = supervisor.dispatch(sample_request()).await.unwrap();
        assert_eq!(response.status, http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dispatch_prefers_the_least_busy_worker() {
        let supervisor = Supervisor::start(SupervisorConfig::default(), spawn_fake_worker(), 2)
            .await
            .unwrap();

        for _ in 0..4 {
            supervisor.dispatch(sample_request()).await.unwrap();
        }

        // Every reply is awaited synchronously above, so in-flight counts
        // settle back to zero once each dispatch returns.
        assert_eq!(supervisor.in_flight(0).await, 0);
        assert_eq!(supervisor.in_flight(1).await, 0);
    }

    #[tokio::test]
    async fn test_lost_worker_fails_pending_requests_and_restarts() {
        let spawned = Arc::new(StdAtomicUsize::new(0));
        let spawned_clone = Arc::clone(&spawned);
        let factory: WorkerFactory = Box::new(move || {
            let spawned = Arc::clone(&spawned_clone);
            Box::pin(async move {
                let attempt = spawned.fetch_add(1, Ordering::SeqCst);
                let (transport, supervisor_side) = ChannelTransport::pair(64);
                if attempt == 0 {
                    // First worker: drop its transport immediately so its
                    // channel closes and the supervisor sees it as lost.
                    drop(transport);
                } else {
                    tokio::spawn(async move {
                        use shovel_worker::Transport;
                        let mut transport = transport;
                        loop {
                            match transport.recv().await {
                                Some(SupervisorToWorker::Request(req)) => {
                                    let _ = transport
                                        .send(WorkerToSupervisor::Response(WireResponse {
                                            id: req.id,
                                            status: http::StatusCode::OK,
                                            status_text: "OK".into(),
                                            headers: http::HeaderMap::new(),
                                            body: bytes::Bytes::new(),
                                        }))
                                        .await;
                                }
                                Some(SupervisorToWorker::Shutdown) | None => return,
                            }
                        }
                    });
                }
                Ok(supervisor_side)
            })
        });

        let supervisor = Supervisor::start(SupervisorConfig::default(), factory, 1)
            .await
            .unwrap();

        // Give the reader task a beat to notice the closed channel and
        // restart the worker before we dispatch.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let response = supervisor.dispatch(sample_request()).await.unwrap();
        assert_eq!(response.status, http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting_new_dispatches() {
        let supervisor = Supervisor::start(SupervisorConfig::default(), spawn_fake_worker(), 1)
            .await
            .unwrap();

        supervisor.shutdown().await;

        let result = supervisor.dispatch(sample_request()).await;
        assert!(matches!(result, Err(ShovelError::InvalidState(_))));
    }
}
