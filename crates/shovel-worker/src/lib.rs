//! # Shovel Worker
//!
//! The runtime half of a Shovel worker process: the global scope a
//! worker's entry module sees on `self`, the supervisor/worker wire
//! protocol, the message loop that drives requests through a
//! `Registration`, and the startup sequence that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! Supervisor
//!     │  Transport (ChannelTransport in-process, or a future
//!     │  subprocess/socket transport)
//!     ▼
//! WorkerRuntime::start
//!     ├── installs GlobalScope (self.caches, self.databases, ...)
//!     ├── runs the entry module (registers install/activate/fetch listeners)
//!     ├── drives Registration::install / activate
//!     ├── announces WorkerToSupervisor::Ready
//!     └── message_loop::run — Request in, Response/Error out, until Shutdown
//! ```

pub mod global_scope;
pub mod message_loop;
pub mod runtime;
pub mod transport;

pub use global_scope::{Clients, GlobalFetchRequest, GlobalScope, GlobalScopeInstaller, LoggerEntry, NativeFetch};
pub use runtime::{EntryModule, WorkerConfig, WorkerRuntime};
pub use transport::{
    ChannelTransport, SupervisorChannel, SupervisorToWorker, Transport, WireError, WireRequest,
    WireResponse, WorkerToSupervisor,
};
