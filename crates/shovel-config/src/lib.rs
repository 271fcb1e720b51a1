//! # Shovel Config
//!
//! Typed deserialization of Shovel's on-disk configuration, the
//! compile-time backend registry user binaries populate at start-up,
//! and the reification pass that turns a config section into the
//! lazy-registry `Factory` the runtime actually runs against.

pub mod pattern;
pub mod registry;
pub mod schema;

pub use registry::{reify_database_factory, reify_storage_factory, BackendRegistry};
pub use schema::{BackendEntry, DatabaseEntry, LoggingSection, ShovelConfig, SinkConfig};
