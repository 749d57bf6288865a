use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::TripError;
use crate::model::{MediaReference, MediaType, RegionId};
use crate::session::{EditorMode, EditorState, Phase};

/// Everything the shell needs to render the trip form.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TripView {
    pub mode: EditorMode,
    pub phase: Phase,
    pub heading: String,
    pub title: String,
    pub comment: String,
    pub rating: u8,
    pub rating_label: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Selected regions, sorted.
    pub regions: Vec<RegionId>,
    pub photo_urls: Vec<String>,
    pub staged: Vec<StagedPreviewView>,
    pub media: Vec<MediaReference>,
    pub error: Option<ErrorView>,
    pub busy: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StagedPreviewView {
    pub index: usize,
    pub filename: String,
    pub preview_url: String,
    pub media_type: MediaType,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorView {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&TripError> for ErrorView {
    fn from(error: &TripError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.user_facing_message(),
            retryable: error.is_retryable(),
        }
    }
}

impl TripView {
    #[must_use]
    pub fn new(state: &EditorState) -> Self {
        let draft = state.draft();
        let phase = state.phase();
        let can_edit = phase == Phase::Ready;

        Self {
            mode: state.mode(),
            phase,
            heading: match state.mode() {
                EditorMode::Create => "Create New Trip",
                EditorMode::Edit => "Edit Trip",
            }
            .to_string(),
            title: draft.title.clone(),
            comment: draft.comment.clone(),
            rating: draft.rating.value(),
            rating_label: draft.rating.label(),
            start_date: draft.start_date,
            end_date: draft.end_date,
            regions: draft.regions.to_vec(),
            photo_urls: draft.photo_urls.clone(),
            staged: state
                .staged()
                .items()
                .iter()
                .enumerate()
                .map(|(index, item)| StagedPreviewView {
                    index,
                    filename: item.file().name.clone(),
                    preview_url: item.preview_url().to_string(),
                    media_type: item.media_type(),
                })
                .collect(),
            media: draft.media.clone(),
            error: state.last_error().map(ErrorView::from),
            busy: phase.is_busy(),
            can_edit,
            can_delete: can_edit && state.mode() == EditorMode::Edit,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::model::{LocalFile, RegionId};
    use crate::session::TripSession;
    use crate::testing::{CountingPreviews, RecordingGateway};

    use super::*;

    #[test]
    fn test_create_view() {
        let session = TripSession::create(
            RecordingGateway::default(),
            Arc::new(CountingPreviews::default()),
        );
        session.set_title("Plains").unwrap();
        session.toggle_region(&RegionId::from("NE")).unwrap();
        session.toggle_region(&RegionId::from("KS")).unwrap();
        session
            .queue_file(LocalFile::new("clip.mp4", Some("video/mp4".into()), vec![1u8]))
            .unwrap();

        let view = session.view();

        assert_eq!(view.heading, "Create New Trip");
        assert_eq!(view.regions, vec![RegionId::from("KS"), RegionId::from("NE")]);
        assert_eq!(view.rating_label, "No rating");
        assert_eq!(view.staged.len(), 1);
        assert_eq!(view.staged[0].media_type, MediaType::Video);
        assert!(view.can_edit);
        assert!(!view.can_delete);
        assert!(view.error.is_none());
    }

    #[test]
    fn test_edit_view_before_load() {
        let session = TripSession::edit(
            RecordingGateway::default(),
            Arc::new(CountingPreviews::default()),
            "t1".into(),
        );
        let view = session.view();

        assert_eq!(view.heading, "Edit Trip");
        assert_eq!(view.phase, Phase::Idle);
        assert!(!view.can_edit);
        assert!(!view.can_delete);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["mode"], "edit");
        assert_eq!(json["phase"], "idle");
    }
}
