use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::model::TripId;
use crate::session::Phase;

/// Local input problems. These never reach the gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("title is required")]
    EmptyTitle,

    #[error("title exceeds {max} characters")]
    TitleTooLong { max: usize },

    #[error("comment exceeds {max} characters")]
    CommentTooLong { max: usize },

    #[error("rating {0} is outside 0..=5")]
    RatingOutOfRange(u8),

    #[error("invalid photo url '{url}': {reason}")]
    InvalidPhotoUrl { url: String, reason: String },

    #[error("too many photo urls (max {max})")]
    TooManyPhotoUrls { max: usize },

    #[error("file '{name}' is empty")]
    EmptyFile { name: String },

    #[error("file '{name}' is {size} bytes, limit is {max}")]
    FileTooLarge { name: String, size: usize, max: usize },
}

/// Failure kinds surfaced at the session operation boundary.
///
/// Every gateway failure is converted into one of these before it leaves a
/// [`crate::session::TripSession`] operation; authentication rejections are
/// kept separate so the session collaborator can re-authenticate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TripError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not load trip: {0}")]
    Load(GatewayError),

    #[error("could not save trip: {0}")]
    Save(GatewayError),

    #[error("trip {trip_id} was saved but {failed} media item(s) failed to attach ({attached} attached)")]
    PartialMedia {
        trip_id: TripId,
        attached: usize,
        failed: usize,
    },

    #[error("upload failed: {0}")]
    Upload(GatewayError),

    #[error("could not delete trip: {0}")]
    Delete(GatewayError),

    #[error("authentication rejected: {0}")]
    Authentication(GatewayError),

    #[error("session is busy ({phase})")]
    Busy { phase: Phase },

    #[error("{operation} is not allowed: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: &'static str,
    },

    #[error("no item at index {index} (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("session has been closed")]
    SessionClosed,
}

impl TripError {
    pub(crate) fn load(error: GatewayError) -> Self {
        Self::from_gateway(error, Self::Load)
    }

    pub(crate) fn save(error: GatewayError) -> Self {
        Self::from_gateway(error, Self::Save)
    }

    pub(crate) fn upload(error: GatewayError) -> Self {
        Self::from_gateway(error, Self::Upload)
    }

    pub(crate) fn delete(error: GatewayError) -> Self {
        Self::from_gateway(error, Self::Delete)
    }

    fn from_gateway(error: GatewayError, wrap: fn(GatewayError) -> Self) -> Self {
        if error.is_authentication() {
            Self::Authentication(error)
        } else {
            wrap(error)
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Load(_) => "LOAD_ERROR",
            Self::Save(_) => "SAVE_ERROR",
            Self::PartialMedia { .. } => "PARTIAL_MEDIA",
            Self::Upload(_) => "UPLOAD_ERROR",
            Self::Delete(_) => "DELETE_ERROR",
            Self::Authentication(_) => "AUTH_ERROR",
            Self::Busy { .. } => "BUSY",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
            Self::SessionClosed => "SESSION_CLOSED",
        }
    }

    /// Whether re-invoking the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Load(e) | Self::Save(e) | Self::Upload(e) | Self::Delete(e) => e.is_retryable(),
            Self::Busy { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Validation(ValidationError::EmptyTitle) => "Title is required.".into(),
            Self::Validation(e) => {
                let mut message = e.to_string();
                if let Some(first) = message.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                message.push('.');
                message
            }
            Self::Load(_) => "Could not load trip.".into(),
            Self::Save(_) => "Failed to save trip.".into(),
            Self::PartialMedia { failed, .. } => format!(
                "Trip saved, but {failed} photo(s)/video(s) could not be attached. \
                 Open the trip to add them again."
            ),
            Self::Upload(_) => "Upload failed. Please try again.".into(),
            Self::Delete(_) => "Failed to delete trip.".into(),
            Self::Authentication(_) => "Your session has expired. Please sign in again.".into(),
            Self::Busy { .. } => "Please wait for the current action to finish.".into(),
            Self::InvalidState { .. } | Self::IndexOutOfRange { .. } => {
                "That action is not available right now.".into()
            }
            Self::SessionClosed => "This trip is no longer open.".into(),
        }
    }
}
