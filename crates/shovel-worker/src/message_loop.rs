//! The worker's single-threaded event loop: reads `SupervisorToWorker`
//! messages off its [`Transport`] and drives each `Request` through the
//! worker's `Registration`, replying with `Response` or `Error`.

use shovel_sw::{Registration, Request};
use std::sync::Arc;
use tracing::error;
use url::Url;

use crate::transport::{
    SupervisorToWorker, Transport, WireError, WireRequest, WireResponse, WorkerToSupervisor,
};

/// Runs until the transport yields `Shutdown` or closes. Out-of-order
/// replies are fine — the supervisor correlates by `id`, not arrival
/// order — so nothing here waits for one request to finish before
/// reading the next message; requests are handled one at a time by
/// construction (a worker is single-threaded), but a slow request never
/// blocks the loop from seeing a `Shutdown`.
pub async fn run(registration: Arc<Registration>, mut transport: impl Transport) {
    loop {
        match transport.recv().await {
            Some(SupervisorToWorker::Request(req)) => {
                let id = req.id;
                let outcome = handle_request(&registration, req).await;
                let msg = match outcome {
                    Ok(response) => WorkerToSupervisor::Response(response),
                    Err(err) => WorkerToSupervisor::Error(WireError {
                        id: Some(id),
                        message: err.to_string(),
                        stack: None,
                    }),
                };
                if let Err(e) = transport.send(msg).await {
                    error!(error = %e, "failed to send reply to supervisor, stopping loop");
                    return;
                }
            }
            Some(SupervisorToWorker::Shutdown) => return,
            None => return,
        }
    }
}

async fn handle_request(
    registration: &Registration,
    wire: WireRequest,
) -> shovel_common::Result<WireResponse> {
    let request = Request::new(wire.method, Url::parse(&wire.url).map_err(|e| {
        shovel_common::ShovelError::InvalidArgument(format!("bad request url: {e}"))
    })?)
    .with_headers(wire.headers)
    .with_body(wire.body);

    let response = registration.dispatch(request).await?;
    Ok(WireResponse {
        id: wire.id,
        status: response.status,
        status_text: response.status_text,
        headers: response.headers,
        body: response.body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use shovel_sw::Response;

    fn registration() -> Arc<Registration> {
        Arc::new(Registration::new(
            Url::parse("http://local/sw.js").unwrap(),
            "/".into(),
        ))
    }

    #[tokio::test]
    async fn test_happy_fetch_round_trips_a_response() {
        let reg = registration();
        reg.install().await.unwrap();
        reg.activate().await.unwrap();
        reg.add_fetch_listener(Box::new(|event| {
            event
                .respond_with(Box::pin(async { Response::text(200, "ok") }))
                .unwrap();
        }))
        .await;

        let (worker_transport, mut supervisor) = ChannelTransport::pair(4);
        let loop_handle = tokio::spawn(run(Arc::clone(&reg), worker_transport));

        supervisor
            .tx
            .send(SupervisorToWorker::Request(WireRequest {
                id: 7,
                method: Method::GET,
                url: "http://local/a".into(),
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }))
            .await
            .unwrap();

        match supervisor.rx.recv().await.unwrap() {
            WorkerToSupervisor::Response(resp) => {
                assert_eq!(resp.id, 7);
                assert_eq!(resp.status, http::StatusCode::OK);
                assert_eq!(resp.body, Bytes::from_static(b"ok"));
            }
            other => panic!("expected a response, got {other:?}"),
        }

        supervisor.tx.send(SupervisorToWorker::Shutdown).await.unwrap();
        loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_response_becomes_an_error_message() {
        let reg = registration();
        reg.install().await.unwrap();
        reg.activate().await.unwrap();
        reg.add_fetch_listener(Box::new(|_event| {})).await;

        let (worker_transport, mut supervisor) = ChannelTransport::pair(4);
        let loop_handle = tokio::spawn(run(Arc::clone(&reg), worker_transport));

        supervisor
            .tx
            .send(SupervisorToWorker::Request(WireRequest {
                id: 1,
                method: Method::GET,
                url: "http://local/a".into(),
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }))
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
        loop_handle.await.unwrap();
    }
}
