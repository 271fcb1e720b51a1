//! End-to-end scenarios driven through the real startup sequence and
//! `ChannelTransport`, not through `Registration`/`DatabaseRegistry`
//! directly: each test spawns `WorkerRuntime::start`, talks to it only
//! over the supervisor-facing half of the wire, and reads back exactly
//! what a real supervisor would see.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use shovel_common::{CategoryLogger, Result, ShovelError};
use shovel_registry::{BoxedEntry, DatabaseRegistry, StorageEntry, StorageRegistry};
use shovel_sw::{Request, Response};
use shovel_worker::{
    ChannelTransport, EntryModule, GlobalFetchRequest, GlobalScope, LoggerEntry, NativeFetch,
    SupervisorChannel, SupervisorToWorker, WireRequest, WorkerConfig, WorkerRuntime,
    WorkerToSupervisor,
};
use std::sync::Arc;
use url::Url;

struct NoopFetch;

#[async_trait]
impl NativeFetch for NoopFetch {
    async fn fetch(&self, _request: Request) -> Result<Response> {
        Response::empty(204)
    }
}

fn empty_storage() -> Arc<StorageRegistry<BoxedEntry>> {
    Arc::new(StorageRegistry::new(Box::new(|name| {
        Err(ShovelError::NotFound(format!("no entry named '{name}'")))
    })))
}

fn empty_databases() -> Arc<DatabaseRegistry<BoxedEntry>> {
    Arc::new(DatabaseRegistry::new(Box::new(|name| {
        Err(ShovelError::NotFound(format!("no database named '{name}'")))
    })))
}

fn loggers() -> Arc<StorageRegistry<LoggerEntry>> {
    Arc::new(StorageRegistry::new(Box::new(|name| {
        Ok(LoggerEntry(CategoryLogger::new(&[name.to_string()])))
    })))
}

fn base_config(databases: Arc<DatabaseRegistry<BoxedEntry>>) -> WorkerConfig {
    WorkerConfig {
        script_url: Url::parse("http://local/sw.js").unwrap(),
        scope: "/".into(),
        caches: empty_storage(),
        directories: empty_storage(),
        databases,
        loggers: loggers(),
        native_fetch: Arc::new(NoopFetch),
    }
}

fn request(id: u64, url: &str) -> WireRequest {
    WireRequest {
        id,
        method: Method::GET,
        url: url.into(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

async fn expect_ready(supervisor: &mut SupervisorChannel) {
    assert!(matches!(
        supervisor.rx.recv().await.unwrap(),
        WorkerToSupervisor::Ready
    ));
}

/// S1 — happy fetch: a `fetch` listener that always responds `200 "ok"`
/// round-trips through the full wire path unchanged.
#[tokio::test]
async fn test_s1_happy_fetch() {
    let (worker_transport, mut supervisor) = ChannelTransport::pair(4);

    let entry: EntryModule = Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            global
                .registration
                .add_fetch_listener(Box::new(|event| {
                    event
                        .respond_with(Box::pin(async { Response::text(200, "ok") }))
                        .unwrap();
                }))
                .await;
        })
    });

    let handle = tokio::spawn(WorkerRuntime::start(
        base_config(empty_databases()),
        entry,
        worker_transport,
    ));
    expect_ready(&mut supervisor).await;

    supervisor
        .tx
        .send(SupervisorToWorker::Request(request(1, "http://local/a")))
        .await
        .unwrap();

    match supervisor.rx.recv().await.unwrap() {
        WorkerToSupervisor::Response(resp) => {
            assert_eq!(resp.status, http::StatusCode::OK);
            assert_eq!(resp.status_text, "OK");
            assert_eq!(
                resp.headers.get(http::header::CONTENT_TYPE).unwrap(),
                "text/plain;charset=UTF-8"
            );
            assert_eq!(resp.body, Bytes::from_static(b"ok"));
        }
        other => panic!("expected a response, got {other:?}"),
    }

    supervisor.tx.send(SupervisorToWorker::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}

/// S2 — cookie set: the listener sets a cookie on the request's jar and
/// responds 204; the reply carries exactly one `Set-Cookie` line for it.
#[tokio::test]
async fn test_s2_cookie_set() {
    let (worker_transport, mut supervisor) = ChannelTransport::pair(4);

    let entry: EntryModule = Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            global
                .registration
                .add_fetch_listener(Box::new(|event| {
                    event.jar().lock().unwrap().set("b", "2", None).unwrap();
                    event
                        .respond_with(Box::pin(async { Response::empty(204) }))
                        .unwrap();
                }))
                .await;
        })
    });

    let handle = tokio::spawn(WorkerRuntime::start(
        base_config(empty_databases()),
        entry,
        worker_transport,
    ));
    expect_ready(&mut supervisor).await;

    let mut req = request(1, "http://local/a");
    req.headers.insert("Cookie", "a=1".parse().unwrap());
    supervisor
        .tx
        .send(SupervisorToWorker::Request(req))
        .await
        .unwrap();

    match supervisor.rx.recv().await.unwrap() {
        WorkerToSupervisor::Response(resp) => {
            let set_cookie: Vec<_> = resp
                .headers
                .get_all(http::header::SET_COOKIE)
                .iter()
                .collect();
            assert_eq!(set_cookie.len(), 1);
            let line = set_cookie[0].to_str().unwrap();
            assert!(line.starts_with("b=2; Path=/; SameSite=Strict; Secure"));
        }
        other => panic!("expected a response, got {other:?}"),
    }

    supervisor.tx.send(SupervisorToWorker::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}

/// S3 — install failure aborts activation: an install listener that
/// rejects its `waitUntil` future fails startup outright, before the
/// worker ever announces `Ready`.
#[tokio::test]
async fn test_s3_install_failure_aborts_startup() {
    let (worker_transport, mut supervisor) = ChannelTransport::pair(4);

    let entry: EntryModule = Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            global
                .registration
                .add_install_listener(Box::new(|event| {
                    event
                        .wait_until(Box::pin(async { Err(ShovelError::internal("boom")) }))
                        .unwrap();
                }))
                .await;
        })
    });

    let handle = tokio::spawn(WorkerRuntime::start(
        base_config(empty_databases()),
        entry,
        worker_transport,
    ));

    let result = handle.await.unwrap();
    assert!(result.is_err());
    assert!(supervisor.rx.try_recv().is_err(), "no Ready should be sent");
}

/// S4 — no response: a registered listener that never calls
/// `respondWith` surfaces as an `Error` message carrying `NoResponse`.
#[tokio::test]
async fn test_s4_no_response_becomes_an_error() {
    let (worker_transport, mut supervisor) = ChannelTransport::pair(4);

    let entry: EntryModule = Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            global
                .registration
                .add_fetch_listener(Box::new(|_event| {}))
                .await;
        })
    });

    let handle = tokio::spawn(WorkerRuntime::start(
        base_config(empty_databases()),
        entry,
        worker_transport,
    ));
    expect_ready(&mut supervisor).await;

    supervisor
        .tx
        .send(SupervisorToWorker::Request(request(1, "http://local/a")))
        .await
        .unwrap();

    match supervisor.rx.recv().await.unwrap() {
        WorkerToSupervisor::Error(err) => {
            assert_eq!(err.id, Some(1));
            assert!(err.message.contains("no response"));
        }
        other => panic!("expected an error, got {other:?}"),
    }

    supervisor.tx.send(SupervisorToWorker::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}

/// S5 — self-fetch loop: a listener that always answers by fetching a
/// relative URL recurses until the 11th nested dispatch trips
/// `RecursionExceeded`, which surfaces as the top-level response.
#[tokio::test]
async fn test_s5_self_fetch_recursion_exceeded() {
    let (worker_transport, mut supervisor) = ChannelTransport::pair(4);

    let entry: EntryModule = Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            let fetching_global = Arc::clone(&global);
            global
                .registration
                .add_fetch_listener(Box::new(move |event| {
                    let global = Arc::clone(&fetching_global);
                    event
                        .respond_with(Box::pin(async move {
                            global
                                .fetch(GlobalFetchRequest {
                                    url: "/x".into(),
                                    method: Method::GET,
                                    headers: HeaderMap::new(),
                                    body: Bytes::new(),
                                })
                                .await
                        }))
                        .unwrap();
                }))
                .await;
        })
    });

    let handle = tokio::spawn(WorkerRuntime::start(
        base_config(empty_databases()),
        entry,
        worker_transport,
    ));
    expect_ready(&mut supervisor).await;

    supervisor
        .tx
        .send(SupervisorToWorker::Request(request(1, "http://local/x")))
        .await
        .unwrap();

    match supervisor.rx.recv().await.unwrap() {
        WorkerToSupervisor::Error(err) => {
            assert_eq!(err.id, Some(1));
            assert!(err.message.contains("recursion exceeded depth 11"));
        }
        other => panic!("expected a recursion error, got {other:?}"),
    }

    supervisor.tx.send(SupervisorToWorker::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}

/// S6 — migration: the entry module opens a database to version 2
/// during startup; the persisted version is 2 by the time `Ready`
/// arrives, and a second `open(2)` against the same registry is a
/// no-op.
#[tokio::test]
async fn test_s6_migration_runs_once_during_startup() {
    struct Adapter;

    #[async_trait]
    impl StorageEntry for Adapter {
        async fn release(&self) {}
    }

    let databases: Arc<DatabaseRegistry<BoxedEntry>> = Arc::new(DatabaseRegistry::new(Box::new(
        |_name| Ok(Arc::new(Adapter) as BoxedEntry),
    )));
    let databases_for_test = Arc::clone(&databases);

    let (worker_transport, mut supervisor) = ChannelTransport::pair(4);

    let entry: EntryModule = Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            let handle = global.databases.get("m").await.unwrap();
            handle
                .add_upgrade_listener(Box::new(|event| {
                    event
                        .wait_until(Box::pin(async { Ok(()) }))
                        .unwrap();
                }))
                .await;
            handle.open(2).await.unwrap();
        })
    });

    let handle = tokio::spawn(WorkerRuntime::start(
        base_config(databases),
        entry,
        worker_transport,
    ));
    expect_ready(&mut supervisor).await;

    let migrated = databases_for_test.get("m").await.unwrap();
    assert_eq!(migrated.version().await, 2);

    // A second open to the same version fires no upgrade event at all.
    migrated.open(2).await.unwrap();
    assert_eq!(migrated.version().await, 2);

    supervisor.tx.send(SupervisorToWorker::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}
