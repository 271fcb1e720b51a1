//! The `Response` value a fetch listener hands to `respondWith`.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use shovel_common::ShovelError;

pub type Result<T> = shovel_common::Result<T>;

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let status_text = status.canonical_reason().unwrap_or("").to_string();
        Self {
            status,
            status_text,
            headers,
            body: body.into(),
        }
    }

    /// A plain-text response, the shape returned by `new Response(body, {status})`
    /// in the common case.
    pub fn text(status: u16, body: impl Into<String>) -> Result<Self> {
        let status = StatusCode::from_u16(status)
            .map_err(|e| ShovelError::InvalidArgument(e.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        Ok(Self::new(status, headers, body.into()))
    }

    /// A body-less response, e.g. for 204 No Content.
    pub fn empty(status: u16) -> Result<Self> {
        let status = StatusCode::from_u16(status)
            .map_err(|e| ShovelError::InvalidArgument(e.to_string()))?;
        Ok(Self::new(status, HeaderMap::new(), Bytes::new()))
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response_sets_default_content_type() {
        let response = Response::text(200, "ok").unwrap();
        assert_eq!(response.status_text, "OK");
        assert_eq!(
            response.headers.get(http::header::CONTENT_TYPE).unwrap(),
            "text/plain;charset=UTF-8"
        );
        assert_eq!(response.body, Bytes::from_static(b"ok"));
    }

    #[test]
    fn test_empty_response_has_no_body() {
        let response = Response::empty(204).unwrap();
        assert!(response.body.is_empty());
        assert_eq!(response.status_text, "No Content");
    }
}
