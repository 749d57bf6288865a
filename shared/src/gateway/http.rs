use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{Credential, GatewayError, TripGateway};
use crate::config::{ConfigError, GatewayConfig};
use crate::model::{LocalFile, MediaReference, Trip, TripId, TripPayload};

pub const MAX_RESPONSE_BODY_SIZE: usize = 100 * 1024 * 1024;
pub const MAX_HEADER_NAME_LENGTH: usize = 256;
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;
pub const MAX_HEADERS_COUNT: usize = 100;

const UPLOAD_FIELD: &str = "file";

/// Framing headers set by the transport, never by callers.
const MANAGED_HEADERS: [&str; 3] = ["host", "content-length", "transfer-encoding"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpHeaders {
    headers: Vec<(String, String)>,
}

impl HttpHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing header of the same name (case-insensitive).
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HttpError> {
        if self.headers.len() >= MAX_HEADERS_COUNT {
            return Err(HttpError::TooManyHeaders {
                count: self.headers.len(),
                max: MAX_HEADERS_COUNT,
            });
        }

        let name = name.into();
        let value = value.into();

        Self::validate_header_name(&name)?;
        Self::validate_header_value(&name, &value)?;

        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value));

        Ok(())
    }

    /// Collects headers received from the network. Framing headers are
    /// dropped; any other rejected header is logged and skipped.
    pub fn from_received<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = Self::new();
        for (name, value) in pairs {
            if Self::is_managed(name) {
                continue;
            }
            if let Err(e) = headers.insert(name, value) {
                debug!(header = %name.chars().take(50).collect::<String>(), "response header skipped: {e}");
            }
        }
        headers
    }

    /// Whether `name` is a framing header owned by the transport.
    #[must_use]
    pub fn is_managed(name: &str) -> bool {
        MANAGED_HEADERS
            .iter()
            .any(|managed| name.eq_ignore_ascii_case(managed))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    fn validate_header_name(name: &str) -> Result<(), HttpError> {
        let invalid = |reason: &str| HttpError::InvalidHeader {
            name: name.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("header name cannot be empty"));
        }
        if name.len() > MAX_HEADER_NAME_LENGTH {
            return Err(invalid("header name is too long"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(invalid(&format!("invalid character '{c}' in header name")));
        }
        if Self::is_managed(name) {
            return Err(invalid("this header is managed automatically"));
        }

        Ok(())
    }

    fn validate_header_value(name: &str, value: &str) -> Result<(), HttpError> {
        if value.len() > MAX_HEADER_VALUE_LENGTH {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: format!("header value exceeds {MAX_HEADER_VALUE_LENGTH} bytes"),
            });
        }
        if value.chars().any(|c| matches!(c, '\r' | '\n' | '\0')) {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: "header value contains CR, LF, or NUL".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    #[must_use]
    pub const fn has_request_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

/// A fully-formed request for the shell to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    method: HttpMethod,
    url: String,
    headers: HttpHeaders,
    body: Option<Vec<u8>>,
    timeout_ms: u64,
    request_id: String,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: &Url) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: HttpHeaders::new(),
            body: None,
            timeout_ms: crate::config::DEFAULT_REQUEST_TIMEOUT_MS,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, HttpError> {
        self.headers.insert(name, value)?;
        Ok(self)
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Result<Self, HttpError> {
        if !self.method.has_request_body() {
            return Err(HttpError::InvalidRequest {
                reason: format!("{} requests cannot have a body", self.method.as_str()),
            });
        }
        self.headers.insert("Content-Type", content_type)?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_vec(value).map_err(|e| HttpError::Serialization {
            message: e.to_string(),
        })?;
        self.with_body("application/json", body)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, HttpError> {
        if timeout_ms == 0 || timeout_ms > crate::config::MAX_TIMEOUT_MS {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout of {timeout_ms}ms is out of range"),
            });
        }
        self.timeout_ms = timeout_ms;
        Ok(self)
    }

    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub const fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    #[must_use]
    pub const fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("too many headers: {count} exceeds maximum of {max}")]
    TooManyHeaders { count: usize, max: usize },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("connection failed to {host}: {message}")]
    Connection { host: String, message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("request cancelled")]
    Cancelled { request_id: String },

    #[error("response body too large: {size} bytes exceeds maximum of {max} bytes")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String, request_id: String },
}

impl HttpError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: HttpHeaders,
    body: Vec<u8>,
    request_id: String,
}

/// Error body shape used by the trip service.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, headers: HttpHeaders, body: Vec<u8>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body,
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::InvalidResponse {
            reason: format!("failed to parse JSON: {e}"),
            request_id: self.request_id.clone(),
        })
    }

    /// Human-readable reason from an error body, falling back to the status.
    #[must_use]
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<ApiErrorResponse>(&self.body)
            .ok()
            .and_then(|e| e.message.or(e.error))
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP error: {}", self.status))
    }
}

pub type HttpResult = Result<HttpResponse, HttpError>;

/// Executes requests on behalf of the core. The shell owns the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> HttpResult;
}

#[derive(Debug, Deserialize)]
struct AttachResponse {
    #[serde(default)]
    media: Option<Vec<MediaReference>>,
}

/// [`TripGateway`] over the trip service's REST API.
pub struct HttpTripGateway<T> {
    transport: T,
    base: Url,
    config: GatewayConfig,
    credential: Credential,
}

impl<T: HttpTransport> HttpTripGateway<T> {
    pub fn new(
        transport: T,
        config: GatewayConfig,
        credential: Credential,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let base = config.base()?;
        Ok(Self {
            transport,
            base,
            config,
            credential,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HttpError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| HttpError::InvalidUrl {
                url: self.base.to_string(),
                reason: "base url cannot carry a path".into(),
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: HttpMethod, segments: &[&str]) -> Result<HttpRequest, HttpError> {
        HttpRequest::new(method, &self.endpoint(segments)?)
            .with_header("Authorization", self.credential.authorization_header())?
            .with_header("Accept", "application/json")?
            .with_timeout_ms(self.config.request_timeout_ms)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let method = request.method().as_str();
        let request_id = request.request_id().to_string();
        debug!(method, url = request.url(), %request_id, "dispatching request");

        let response = self.transport.execute(request).await?;
        if response.body().len() > MAX_RESPONSE_BODY_SIZE {
            return Err(HttpError::ResponseTooLarge {
                size: response.body().len(),
                max: MAX_RESPONSE_BODY_SIZE,
            }
            .into());
        }
        if response.is_success() {
            return Ok(response);
        }

        let error = GatewayError::from_status(response.status(), response.error_message());
        warn!(method, status = response.status(), %request_id, "request failed: {error}");
        Err(error)
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, GatewayError> {
    response
        .json()
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

/// Encodes one file as a `multipart/form-data` body. Returns the content
/// type (with boundary) and the body bytes.
fn multipart_body(field: &str, file: &LocalFile) -> (String, Vec<u8>) {
    let boundary = format!("----tripbook-{}", Uuid::new_v4().simple());
    let filename: String = file
        .name
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .map(|c| if c == '"' { '\'' } else { c })
        .collect();

    let mut body = Vec::with_capacity(file.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.mime()).as_bytes());
    body.extend_from_slice(&file.data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}

#[async_trait]
impl<T: HttpTransport> TripGateway for HttpTripGateway<T> {
    async fn list_trips(&self) -> Result<Vec<Trip>, GatewayError> {
        let request = self.request(HttpMethod::Get, &["trips"])?;
        decode(&self.send(request).await?)
    }

    async fn fetch_trip(&self, id: &TripId) -> Result<Trip, GatewayError> {
        let request = self.request(HttpMethod::Get, &["trips", id.as_str()])?;
        decode(&self.send(request).await?)
    }

    async fn create_trip(&self, payload: &TripPayload) -> Result<Trip, GatewayError> {
        let request = self.request(HttpMethod::Post, &["trips"])?.with_json(payload)?;
        decode(&self.send(request).await?)
    }

    async fn update_trip(&self, id: &TripId, payload: &TripPayload) -> Result<Trip, GatewayError> {
        let request = self
            .request(HttpMethod::Put, &["trips", id.as_str()])?
            .with_json(payload)?;
        decode(&self.send(request).await?)
    }

    async fn delete_trip(&self, id: &TripId) -> Result<(), GatewayError> {
        let request = self.request(HttpMethod::Delete, &["trips", id.as_str()])?;
        self.send(request).await.map(|_| ())
    }

    #[instrument(skip(self, file), fields(file = %file.name, size = file.len()))]
    async fn upload_file(&self, file: &LocalFile) -> Result<MediaReference, GatewayError> {
        file.check_size(self.config.max_upload_bytes)
            .map_err(|e| GatewayError::Rejected {
                status: 413,
                message: e.to_string(),
            })?;
        let (content_type, body) = multipart_body(UPLOAD_FIELD, file);
        let request = self
            .request(HttpMethod::Post, &["uploads"])?
            .with_timeout_ms(self.config.upload_timeout_ms)?
            .with_body(&content_type, body)?;
        decode(&self.send(request).await?)
    }

    fn max_upload_bytes(&self) -> usize {
        self.config.max_upload_bytes
    }

    async fn attach_media(
        &self,
        id: &TripId,
        media: &MediaReference,
    ) -> Result<Vec<MediaReference>, GatewayError> {
        let request = self
            .request(HttpMethod::Post, &["trips", id.as_str(), "media"])?
            .with_json(media)?;
        let response: AttachResponse = decode(&self.send(request).await?)?;
        Ok(response.media.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_validation_empty_name() {
        let mut headers = HttpHeaders::new();
        assert!(headers.insert("", "value").is_err());
    }

    #[test]
    fn test_header_validation_invalid_chars() {
        let mut headers = HttpHeaders::new();
        assert!(headers.insert("Header:Name", "value").is_err());
    }

    #[test]
    fn test_header_validation_crlf_injection() {
        let mut headers = HttpHeaders::new();
        assert!(headers.insert("X-Custom", "value\r\nEvil: header").is_err());
    }

    #[test]
    fn test_header_validation_reserved() {
        let mut headers = HttpHeaders::new();
        assert!(headers.insert("Host", "evil.com").is_err());
    }

    #[test]
    fn test_header_case_insensitive_replacement() {
        let mut headers = HttpHeaders::new();
        headers.insert("Accept", "text/html").unwrap();
        headers.insert("accept", "application/json").unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("ACCEPT"), Some("application/json"));
    }

    #[test]
    fn test_received_headers_drop_framing_and_invalid_names() {
        let long_value = "x".repeat(MAX_HEADER_VALUE_LENGTH + 1);
        let headers = HttpHeaders::from_received([
            ("Content-Length", "42"),
            ("transfer-encoding", "chunked"),
            ("X-Request-Id", "req-9"),
            ("bad header", "1"),
            ("X-Big", long_value.as_str()),
            ("Content-Type", "application/json"),
        ]);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-request-id"), Some("req-9"));
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("content-length"), None);
        assert!(HttpHeaders::is_managed("HOST"));
        assert!(!HttpHeaders::is_managed("Accept"));
    }

    #[test]
    fn test_request_body_on_get_fails() {
        let url = Url::parse("https://api.example.com/trips").unwrap();
        let result = HttpRequest::new(HttpMethod::Get, &url).with_body("text/plain", vec![1]);
        assert!(matches!(result, Err(HttpError::InvalidRequest { .. })));
    }

    #[test]
    fn test_request_timeout_bounds() {
        let url = Url::parse("https://api.example.com/trips").unwrap();
        assert!(HttpRequest::new(HttpMethod::Get, &url).with_timeout_ms(0).is_err());
        assert!(HttpRequest::new(HttpMethod::Get, &url).with_timeout_ms(5_000).is_ok());
    }

    #[test]
    fn test_error_message_from_body() {
        let response = HttpResponse::new(
            400,
            HttpHeaders::new(),
            br#"{"message":"Title is required"}"#.to_vec(),
            "req-1",
        );
        assert_eq!(response.error_message(), "Title is required");

        let response = HttpResponse::new(502, HttpHeaders::new(), b"<html>".to_vec(), "req-2");
        assert_eq!(response.error_message(), "HTTP error: 502");
    }

    #[test]
    fn test_multipart_body_layout() {
        let file = LocalFile::new("my \"beach\".jpg", Some("image/jpeg".into()), b"JPEGDATA".to_vec());
        let (content_type, body) = multipart_body("file", &file);

        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains("name=\"file\"; filename=\"my 'beach'.jpg\""));
        assert!(text.contains("Content-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn test_endpoint_encodes_ids() {
        struct Never;

        #[async_trait]
        impl HttpTransport for Never {
            async fn execute(&self, request: HttpRequest) -> HttpResult {
                Err(HttpError::Cancelled {
                    request_id: request.request_id().to_string(),
                })
            }
        }

        let gateway = HttpTripGateway::new(
            Never,
            GatewayConfig::new("https://trips.example.com/api/"),
            Credential::bearer("t"),
        )
        .unwrap();
        let url = gateway.endpoint(&["trips", "a/b c", "media"]).unwrap();
        assert_eq!(url.as_str(), "https://trips.example.com/api/trips/a%2Fb%20c/media");
    }
}
