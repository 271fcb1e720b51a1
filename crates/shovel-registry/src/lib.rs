//! # Shovel Registry
//!
//! Lazy, factory-backed registries for named storage instances: the
//! generic [`storage::StorageRegistry`] used for caches and directories,
//! and [`database::DatabaseRegistry`], which adds the version-gated
//! `upgradeneeded` migration sequence required before a database is
//! usable.

pub mod database;
pub mod storage;

pub use database::{DatabaseHandle, DatabaseRegistry, UpgradeEvent, UpgradeListener};
pub use storage::{BoxedEntry, Factory, StorageEntry, StorageRegistry};
