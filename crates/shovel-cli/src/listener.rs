//! The inbound HTTP listener: an `axum` router with a single catch-all
//! route that turns every request into a [`WireRequest`], dispatches it
//! through the [`Supervisor`], and turns the [`WireResponse`] (or
//! dispatch error) back into an HTTP response.

use axum::extract::State;
use axum::http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
use axum::Router;
use shovel_common::ShovelError;
use shovel_worker::WireRequest;
use std::sync::Arc;

use shovel_supervisor::Supervisor;

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new().fallback(dispatch).with_state(supervisor)
}

async fn dispatch(
    State(supervisor): State<Arc<Supervisor>>,
    request: HttpRequest<axum::body::Body>,
) -> HttpResponse<axum::body::Body> {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let wire = WireRequest {
        id: 0,
        method: parts.method,
        url: parts.uri.to_string(),
        headers: parts.headers,
        body,
    };

    match supervisor.dispatch(wire).await {
        Ok(response) => {
            let mut builder = HttpResponse::builder().status(response.status);
            if let Some(headers) = builder.headers_mut() {
                *headers = response.headers;
            }
            builder
                .body(axum::body::Body::from(response.body))
                .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

fn status_for(error: &ShovelError) -> StatusCode {
    match error {
        ShovelError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        ShovelError::WorkerLost(_) => StatusCode::BAD_GATEWAY,
        ShovelError::InvalidState(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> HttpResponse<axum::body::Body> {
    HttpResponse::builder()
        .status(status)
        .body(axum::body::Body::from(message))
        .expect("a fixed status and plain body always build")
}
