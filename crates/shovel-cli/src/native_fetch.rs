//! The [`NativeFetch`] implementation backing absolute-URL `fetch` calls
//! made from inside a worker: a thin wrapper over a [`reqwest::Client`].

use async_trait::async_trait;
use shovel_common::{Result, ShovelError};
use shovel_sw::{Request, Response};
use shovel_worker::NativeFetch;

pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ShovelError::internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

impl Default for ReqwestFetch {
    fn default() -> Self {
        Self::new().expect("default reqwest client builds")
    }
}

#[async_trait]
impl NativeFetch for ReqwestFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .body(request.body.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ShovelError::internal(format!("native fetch failed: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ShovelError::internal(format!("failed to read native fetch body: {e}")))?;

        Ok(Response::new(status, headers, body))
    }
}
