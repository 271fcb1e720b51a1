//! Supervisor ↔ worker duplex channel. Mirrors a `MessagePort`/
//! `MessageChannel` pair (two entangled `mpsc` channels) but narrowed to
//! the fixed message vocabulary this runtime actually needs, and exposed
//! behind a [`Transport`] trait so the in-process implementation can
//! later be swapped for a real subprocess or socket transport without
//! touching the worker runtime or the supervisor.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::mpsc;

/// A request the supervisor forwards to a worker.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub id: u64,
    pub method: http::Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A response the worker forwards back to the supervisor.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub id: u64,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// An error the worker forwards back in place of a response. `id` is
/// absent for worker-level failures not tied to any one request.
#[derive(Debug, Clone)]
pub struct WireError {
    pub id: Option<u64>,
    pub message: String,
    pub stack: Option<String>,
}

/// Messages a worker sends to its supervisor.
#[derive(Debug, Clone)]
pub enum WorkerToSupervisor {
    Response(WireResponse),
    Error(WireError),
    /// Sent exactly once, after the worker runtime finishes startup.
    Ready,
}

/// Messages a supervisor sends to a worker.
#[derive(Debug, Clone)]
pub enum SupervisorToWorker {
    Request(WireRequest),
    Shutdown,
}

/// The duplex channel abstraction described by the data model's "wire
/// message" entry. A future out-of-process transport would serialise
/// these the way the wire format describes; the in-process transport
/// below exchanges them as plain typed values.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, msg: WorkerToSupervisor) -> shovel_common::Result<()>;
    async fn recv(&mut self) -> Option<SupervisorToWorker>;
}

/// In-process transport: a pair of `tokio::sync::mpsc` channels, entangled
/// the same way a `MessagePort::create_pair` wires up two ports sharing
/// each other's sender.
pub struct ChannelTransport {
    tx: mpsc::Sender<WorkerToSupervisor>,
    rx: mpsc::Receiver<SupervisorToWorker>,
}

/// The supervisor-side half of a [`ChannelTransport`] pair.
pub struct SupervisorChannel {
    pub tx: mpsc::Sender<SupervisorToWorker>,
    pub rx: mpsc::Receiver<WorkerToSupervisor>,
}

impl ChannelTransport {
    /// Creates an entangled pair: the worker-facing [`ChannelTransport`]
    /// and the supervisor-facing [`SupervisorChannel`] that drives it.
    pub fn pair(capacity: usize) -> (Self, SupervisorChannel) {
        let (to_supervisor_tx, to_supervisor_rx) = mpsc::channel(capacity);
        let (to_worker_tx, to_worker_rx) = mpsc::channel(capacity);

        let worker_side = Self {
            tx: to_supervisor_tx,
            rx: to_worker_rx,
        };
        let supervisor_side = SupervisorChannel {
            tx: to_worker_tx,
            rx: to_supervisor_rx,
        };
        (worker_side, supervisor_side)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, msg: WorkerToSupervisor) -> shovel_common::Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| shovel_common::ShovelError::WorkerLost("supervisor channel closed".into()))
    }

    async fn recv(&mut self) -> Option<SupervisorToWorker> {
        self.rx.recv().await
    }
}
