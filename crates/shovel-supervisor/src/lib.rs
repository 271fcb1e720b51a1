//! # Shovel Supervisor
//!
//! The pool that owns every worker's duplex channel, dispatches
//! incoming HTTP requests to the least-busy one, and restarts a worker
//! that disappears out from under it.

pub mod pool;

pub use pool::{Supervisor, SupervisorConfig, WorkerFactory};
