//! # Shovel ServiceWorker runtime
//!
//! The event, cookie, and registration machinery that drives the
//! `install → activate → fetch` lifecycle: a `Registration` owns one
//! worker's state machine and listener table, dispatching inbound
//! requests through a [`fetch_event::FetchEvent`] whose lifetime is
//! extended by `waitUntil`/`respondWith` exactly as the base
//! [`event::ExtendableEvent`] describes.

pub mod context;
pub mod cookie;
pub mod event;
pub mod fetch_event;
pub mod registration;
pub mod request;
pub mod response;

pub use context::{RequestContext, RequestContextValue, MAX_RECURSION_DEPTH};
pub use cookie::{CookieJar, SameSite, SetCookieOptions};
pub use event::{EventKind, ExtendableEvent, PendingFuture};
pub use fetch_event::{ExtensionHook, FetchEvent, ResponseFuture};
pub use registration::{
    ActivateListener, FetchListener, InstallListener, Registration, WorkerState,
};
pub use request::Request;
pub use response::Response;
