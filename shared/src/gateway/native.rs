//! `reqwest`-backed transport for shells that run the core natively.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

use super::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport,
    MAX_RESPONSE_BODY_SIZE,
};

#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn received_headers(map: &reqwest::header::HeaderMap) -> HttpHeaders {
    HttpHeaders::from_received(map.iter().filter_map(|(name, value)| match value.to_str() {
        Ok(value) => Some((name.as_str(), value)),
        Err(_) => {
            debug!(header = %name, "non-ASCII response header skipped");
            None
        }
    }))
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let request_id = request.request_id().to_string();
        let mut builder = self
            .client
            .request(method(request.method()), request.url())
            .timeout(Duration::from_millis(request.timeout_ms()));
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    timeout_ms: request.timeout_ms(),
                    request_id: request_id.clone(),
                }
            } else {
                HttpError::Connection {
                    host: host_of(request.url()),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = received_headers(response.headers());

        let body = response.bytes().await.map_err(|e| HttpError::InvalidResponse {
            reason: e.to_string(),
            request_id: request_id.clone(),
        })?;
        if body.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(HttpError::ResponseTooLarge {
                size: body.len(),
                max: MAX_RESPONSE_BODY_SIZE,
            });
        }

        debug!(status, %request_id, bytes = body.len(), "response received");
        Ok(HttpResponse::new(status, headers, body.to_vec(), request_id))
    }
}
