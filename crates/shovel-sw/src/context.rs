//! The per-request ambient context: the cookie jar and fetch recursion
//! depth a handler can read without having either threaded to it
//! explicitly.
//!
//! The data model calls for a value that "must be inherited across any
//! asynchronous hop the handler makes." `tokio::task_local!` is the
//! idiomatic match: a scope installed with `CURRENT.scope(value, fut)`
//! is visible to every `.await` inside `fut`, including further nested
//! scopes for recursive self-fetch, without requiring the handler to
//! carry the value itself.

use std::future::Future;
use std::sync::Arc;

use shovel_common::ShovelError;
use std::sync::Mutex;

use crate::cookie::CookieJar;

pub type Result<T> = shovel_common::Result<T>;

/// Hard cap from the data model: self-fetch recursion deeper than this
/// fails with `RecursionExceeded`.
pub const MAX_RECURSION_DEPTH: u32 = 10;

#[derive(Clone)]
pub struct RequestContextValue {
    pub jar: Arc<Mutex<CookieJar>>,
    pub depth: u32,
}

impl RequestContextValue {
    pub fn new(jar: CookieJar) -> Self {
        Self {
            jar: Arc::new(Mutex::new(jar)),
            depth: 0,
        }
    }

    /// A context for a nested self-fetch, one level deeper than the
    /// context it was derived from, sharing the same jar.
    pub fn nested(&self) -> Result<Self> {
        let depth = self.depth + 1;
        if depth > MAX_RECURSION_DEPTH {
            return Err(ShovelError::RecursionExceeded(depth));
        }
        Ok(Self {
            jar: self.jar.clone(),
            depth,
        })
    }
}

tokio::task_local! {
    static CURRENT: RequestContextValue;
}

pub struct RequestContext;

impl RequestContext {
    /// Execute `fut` with `value` bound as the current request context,
    /// restoring whatever was bound before on every exit path (panics
    /// included, since the scope's guard is dropped by unwinding too).
    pub async fn run<F, T>(value: RequestContextValue, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        CURRENT.scope(value, fut).await
    }

    pub fn with_current<R>(f: impl FnOnce(&RequestContextValue) -> R) -> Result<R> {
        CURRENT
            .try_with(|value| f(value))
            .map_err(|_| ShovelError::InvalidState("no request context bound".into()))
    }

    pub fn depth() -> Result<u32> {
        Self::with_current(|value| value.depth)
    }

    pub fn jar() -> Result<Arc<Mutex<CookieJar>>> {
        Self::with_current(|value| value.jar.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_see_bound_context() {
        let value = RequestContextValue::new(CookieJar::default());
        RequestContext::run(value, async {
            assert_eq!(RequestContext::depth().unwrap(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn test_context_is_restored_after_scope_exits() {
        let value = RequestContextValue::new(CookieJar::default());
        RequestContext::run(value, async {}).await;
        assert!(RequestContext::depth().is_err());
    }

    #[tokio::test]
    async fn test_nested_context_increments_depth() {
        let value = RequestContextValue::new(CookieJar::default());
        RequestContext::run(value, async {
            let nested = RequestContext::with_current(|v| v.nested()).unwrap().unwrap();
            RequestContext::run(nested, async {
                assert_eq!(RequestContext::depth().unwrap(), 1);
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_recursion_past_the_cap_is_rejected() {
        let mut value = RequestContextValue::new(CookieJar::default());
        value.depth = MAX_RECURSION_DEPTH;
        assert!(matches!(
            value.nested(),
            Err(ShovelError::RecursionExceeded(_))
        ));
    }
}
