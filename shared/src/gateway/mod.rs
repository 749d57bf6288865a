//! Boundary to the remote trip-and-media service.
//!
//! The core only depends on [`TripGateway`]. [`http::HttpTripGateway`] maps
//! it onto the REST service through a shell-provided
//! [`http::HttpTransport`]; tests substitute an in-memory implementation.

pub mod http;

#[cfg(feature = "native-http")]
pub mod native;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::model::{LocalFile, MediaReference, Trip, TripId, TripPayload};

pub use self::http::{HttpError, HttpTransport, HttpTripGateway};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("credential rejected (HTTP {status})")]
    Authentication { status: u16 },

    #[error("not found")]
    NotFound,

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    /// Maps a non-success status to the gateway taxonomy.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Authentication { status },
            404 => Self::NotFound,
            400 | 409 | 413 | 415 | 422 => Self::Rejected { status, message },
            _ => Self::Status { status, message },
        }
    }
}

/// Caller identity presented on every gateway call.
///
/// Passed in explicitly when a gateway is built; never read from ambient
/// process state.
#[derive(Clone)]
pub struct Credential {
    token: Arc<SecretString>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(SecretString::new(token.into())),
        }
    }

    pub(crate) fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[async_trait]
pub trait TripGateway: Send + Sync {
    /// Trips owned by the credential holder, in service order.
    async fn list_trips(&self) -> Result<Vec<Trip>, GatewayError>;

    async fn fetch_trip(&self, id: &TripId) -> Result<Trip, GatewayError>;

    /// Returns the stored record including its assigned id.
    async fn create_trip(&self, payload: &TripPayload) -> Result<Trip, GatewayError>;

    async fn update_trip(&self, id: &TripId, payload: &TripPayload) -> Result<Trip, GatewayError>;

    async fn delete_trip(&self, id: &TripId) -> Result<(), GatewayError>;

    async fn upload_file(&self, file: &LocalFile) -> Result<MediaReference, GatewayError>;

    /// Largest file `upload_file` accepts. Sessions check staged and picked
    /// files against it before any network call.
    fn max_upload_bytes(&self) -> usize {
        DEFAULT_MAX_UPLOAD_BYTES
    }

    /// Appends `media` to the trip and returns the trip's full media list as
    /// the service now stores it.
    async fn attach_media(
        &self,
        id: &TripId,
        media: &MediaReference,
    ) -> Result<Vec<MediaReference>, GatewayError>;
}
