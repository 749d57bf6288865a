//! Editing session for one trip.
//!
//! A session is opened in create mode (no trip id) or edit mode (existing
//! trip id) and keeps that mode for its whole life. Its state lives in a
//! `watch` channel: every accepted mutation updates the value and wakes
//! subscribers, and the shell re-renders from [`TripSession::view`].
//!
//! ```text
//! create: Ready ─save─▶ Saving ─▶ Saved
//!                          └────▶ Ready (error kept)
//! edit:   Idle ─load─▶ Loading ─▶ Ready | LoadError
//!         Ready ─save─▶ Saving ─▶ Saved | Ready
//!         Ready ─delete─▶ Deleting ─▶ Deleted | Ready
//!         Ready ─upload─▶ Uploading ─▶ Ready
//! any ─teardown─▶ Closed
//! ```
//!
//! Mutations are refused while a network call is in flight, so a session
//! never has two calls outstanding and edits made during a save cannot
//! reach the payload already sent.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::error::{TripError, ValidationError};
use crate::gateway::{GatewayError, TripGateway};
use crate::model::{LocalFile, MediaReference, Rating, RegionId, Trip, TripId, TripPayload};
use crate::regions::RegionSet;
use crate::staging::{flush_queue, PreviewProvider, StagingQueue};
use crate::view::TripView;
use crate::{MAX_COMMENT_LENGTH, MAX_PHOTO_URLS, MAX_TITLE_LENGTH};

pub const DELETE_PROMPT: &str = "Delete this trip? This cannot be undone.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    Create,
    Edit,
}

impl fmt::Display for EditorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Edit => "edit",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    LoadError,
    Saving,
    Uploading,
    Deleting,
    Saved,
    Deleted,
    Closed,
}

impl Phase {
    /// A network call is in flight.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Saving | Self::Uploading | Self::Deleting
        )
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Saved | Self::Deleted | Self::Closed)
    }

    fn check_editable(self, operation: &'static str) -> Result<(), TripError> {
        match self {
            Self::Ready => Ok(()),
            Self::Closed => Err(TripError::SessionClosed),
            phase if phase.is_busy() => {
                warn!(operation, %phase, "rejected while busy");
                Err(TripError::Busy { phase })
            }
            Self::Saved | Self::Deleted => Err(TripError::InvalidState {
                operation,
                reason: "editing has finished",
            }),
            _ => Err(TripError::InvalidState {
                operation,
                reason: "trip is not loaded",
            }),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::LoadError => "load_error",
            Self::Saving => "saving",
            Self::Uploading => "uploading",
            Self::Deleting => "deleting",
            Self::Saved => "saved",
            Self::Deleted => "deleted",
            Self::Closed => "closed",
        })
    }
}

/// The editable fields of a trip.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TripDraft {
    pub title: String,
    pub regions: RegionSet,
    pub comment: String,
    pub rating: Rating,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub photo_urls: Vec<String>,
    /// Attached media, as last reported by the service.
    pub media: Vec<MediaReference>,
}

impl From<Trip> for TripDraft {
    fn from(trip: Trip) -> Self {
        Self {
            title: trip.title,
            regions: trip.regions,
            comment: trip.comment,
            rating: trip.rating,
            start_date: trip.start_date,
            end_date: trip.end_date,
            photo_urls: trip.photo_urls,
            media: trip.media,
        }
    }
}

impl TripDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(ValidationError::TitleTooLong {
                max: MAX_TITLE_LENGTH,
            });
        }
        if self.comment.chars().count() > MAX_COMMENT_LENGTH {
            return Err(ValidationError::CommentTooLong {
                max: MAX_COMMENT_LENGTH,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn to_payload(&self) -> TripPayload {
        TripPayload {
            title: self.title.trim().to_string(),
            regions: self.regions.clone(),
            comment: self.comment.clone(),
            rating: self.rating,
            photo_urls: self.photo_urls.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

/// Trims `input` and checks that it is an http(s) URL with a host and no
/// embedded credentials.
pub fn parse_photo_url(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    let invalid = |reason: &str| ValidationError::InvalidPhotoUrl {
        url: trimmed.chars().take(100).collect(),
        reason: reason.to_string(),
    };

    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are allowed"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("URL must not contain credentials"));
    }
    Ok(url.to_string())
}

/// Observable state of a session.
#[derive(Debug)]
pub struct EditorState {
    mode: EditorMode,
    phase: Phase,
    trip_id: Option<TripId>,
    draft: TripDraft,
    staged: StagingQueue,
    last_error: Option<TripError>,
}

impl EditorState {
    #[must_use]
    pub const fn mode(&self) -> EditorMode {
        self.mode
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn trip_id(&self) -> Option<&TripId> {
        self.trip_id.as_ref()
    }

    #[must_use]
    pub const fn draft(&self) -> &TripDraft {
        &self.draft
    }

    #[must_use]
    pub const fn staged(&self) -> &StagingQueue {
        &self.staged
    }

    #[must_use]
    pub const fn last_error(&self) -> Option<&TripError> {
        self.last_error.as_ref()
    }

    fn fail(&mut self, phase: Phase, error: TripError) -> TripError {
        self.phase = phase;
        self.last_error = Some(error.clone());
        error
    }
}

/// Asks the user before a destructive action.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirmation for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    pub trip_id: TripId,
    /// The trip was created by this save.
    pub created: bool,
    /// Staged files uploaded and attached.
    pub attached: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
    AlreadyDeleted,
}

pub struct TripSession<G> {
    gateway: G,
    state: watch::Sender<EditorState>,
    /// Overrides the gateway's upload limit when set.
    upload_limit: Option<usize>,
}

impl<G> TripSession<G> {
    /// Opens a session; the presence of `trip_id` selects edit mode.
    pub fn open(gateway: G, previews: Arc<dyn PreviewProvider>, trip_id: Option<TripId>) -> Self {
        let (mode, phase) = match trip_id {
            Some(_) => (EditorMode::Edit, Phase::Idle),
            None => (EditorMode::Create, Phase::Ready),
        };
        let (state, _) = watch::channel(EditorState {
            mode,
            phase,
            trip_id,
            draft: TripDraft::default(),
            staged: StagingQueue::new(previews),
            last_error: None,
        });
        info!(%mode, "editing session opened");
        Self {
            gateway,
            state,
            upload_limit: None,
        }
    }

    pub fn create(gateway: G, previews: Arc<dyn PreviewProvider>) -> Self {
        Self::open(gateway, previews, None)
    }

    pub fn edit(gateway: G, previews: Arc<dyn PreviewProvider>, trip_id: TripId) -> Self {
        Self::open(gateway, previews, Some(trip_id))
    }

    /// Caps uploads below the gateway's own limit.
    #[must_use]
    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.upload_limit = Some(max_upload_bytes);
        self
    }

    /// Receives a notification after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EditorState> {
        self.state.subscribe()
    }

    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    #[must_use]
    pub fn mode(&self) -> EditorMode {
        self.state.borrow().mode
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    #[must_use]
    pub fn trip_id(&self) -> Option<TripId> {
        self.state.borrow().trip_id.clone()
    }

    #[must_use]
    pub fn draft(&self) -> TripDraft {
        self.state.borrow().draft.clone()
    }

    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.state.borrow().staged.len()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<TripError> {
        self.state.borrow().last_error.clone()
    }

    #[must_use]
    pub fn view(&self) -> TripView {
        TripView::new(&self.state.borrow())
    }

    /// Runs `f` against the live state unless the session is closed.
    /// Subscribers are notified when `f` succeeds or records an error.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut EditorState) -> Result<R, TripError>,
    ) -> Result<R, TripError> {
        let mut outcome = Err(TripError::SessionClosed);
        self.state.send_if_modified(|state| {
            if state.phase == Phase::Closed {
                return false;
            }
            let error_before = state.last_error.clone();
            outcome = f(state);
            outcome.is_ok() || state.last_error != error_before
        });
        outcome
    }

    fn mutate<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut EditorState) -> Result<R, TripError>,
    ) -> Result<R, TripError> {
        self.update(|state| {
            state.phase.check_editable(operation)?;
            f(state)
        })
    }

    pub fn set_title(&self, title: impl Into<String>) -> Result<(), TripError> {
        let title = title.into();
        self.mutate("set_title", |state| {
            state.draft.title = title;
            Ok(())
        })
    }

    pub fn set_comment(&self, comment: impl Into<String>) -> Result<(), TripError> {
        let comment = comment.into();
        self.mutate("set_comment", |state| {
            state.draft.comment = comment;
            Ok(())
        })
    }

    pub fn set_rating(&self, stars: u8) -> Result<(), TripError> {
        let rating = Rating::new(stars)?;
        self.mutate("set_rating", |state| {
            state.draft.rating = rating;
            Ok(())
        })
    }

    pub fn set_start_date(&self, date: Option<NaiveDate>) -> Result<(), TripError> {
        self.mutate("set_start_date", |state| {
            state.draft.start_date = date;
            Ok(())
        })
    }

    pub fn set_end_date(&self, date: Option<NaiveDate>) -> Result<(), TripError> {
        self.mutate("set_end_date", |state| {
            state.draft.end_date = date;
            Ok(())
        })
    }

    /// Flips membership of `region`. Returns whether it is now selected.
    pub fn toggle_region(&self, region: &RegionId) -> Result<bool, TripError> {
        self.mutate("toggle_region", |state| {
            state.draft.regions = state.draft.regions.toggle(region);
            Ok(state.draft.regions.contains(region))
        })
    }

    /// Appends a photo URL. Blank input is ignored.
    pub fn add_photo_url(&self, input: &str) -> Result<(), TripError> {
        if input.trim().is_empty() {
            return Ok(());
        }
        let url = parse_photo_url(input)?;
        self.mutate("add_photo_url", |state| {
            if state.draft.photo_urls.len() >= MAX_PHOTO_URLS {
                return Err(ValidationError::TooManyPhotoUrls {
                    max: MAX_PHOTO_URLS,
                }
                .into());
            }
            state.draft.photo_urls.push(url);
            Ok(())
        })
    }

    pub fn remove_photo_url(&self, index: usize) -> Result<String, TripError> {
        self.mutate("remove_photo_url", |state| {
            let len = state.draft.photo_urls.len();
            if index >= len {
                return Err(TripError::IndexOutOfRange { index, len });
            }
            Ok(state.draft.photo_urls.remove(index))
        })
    }

    pub fn unqueue(&self, index: usize) -> Result<LocalFile, TripError> {
        self.mutate("unqueue", |state| state.staged.unqueue(index))
    }

    /// Ends the session: releases every staged preview and ignores any
    /// network result that arrives afterwards. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.state.send_if_modified(|state| {
            if state.phase == Phase::Closed {
                return false;
            }
            let released = state.staged.dispose_all();
            state.phase = Phase::Closed;
            info!(released, "editing session closed");
            true
        });
    }
}

impl<G: TripGateway> TripSession<G> {
    fn upload_limit(&self) -> usize {
        let gateway_max = self.gateway.max_upload_bytes();
        self.upload_limit.map_or(gateway_max, |max| max.min(gateway_max))
    }

    /// Stages a file for upload after the trip is created. Returns the
    /// queue length.
    pub fn queue_file(&self, file: LocalFile) -> Result<usize, TripError> {
        let max = self.upload_limit();
        self.mutate("queue_file", |state| {
            if state.mode != EditorMode::Create {
                return Err(TripError::InvalidState {
                    operation: "queue_file",
                    reason: "edit-mode uploads are immediate",
                });
            }
            file.check_size(max)?;
            Ok(state.staged.queue_file(file).len())
        })
    }

    /// Fetches the trip in edit mode. On failure the fields keep their
    /// defaults and stay locked until a retry succeeds.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), TripError> {
        let trip_id = self.update(|state| {
            if state.mode == EditorMode::Create {
                return Err(TripError::InvalidState {
                    operation: "load",
                    reason: "create mode has no trip to load",
                });
            }
            match state.phase {
                Phase::Idle | Phase::LoadError => {}
                Phase::Closed => return Err(TripError::SessionClosed),
                phase if phase.is_busy() => return Err(TripError::Busy { phase }),
                _ => {
                    return Err(TripError::InvalidState {
                        operation: "load",
                        reason: "trip is already loaded",
                    })
                }
            }
            let trip_id = state.trip_id.clone().ok_or(TripError::InvalidState {
                operation: "load",
                reason: "no trip id",
            })?;
            state.phase = Phase::Loading;
            state.last_error = None;
            Ok(trip_id)
        })?;

        let result = self.gateway.fetch_trip(&trip_id).await;
        self.update(|state| match result {
            Ok(trip) => {
                state.draft = TripDraft::from(trip);
                state.phase = Phase::Ready;
                info!(%trip_id, "trip loaded");
                Ok(())
            }
            Err(e) => {
                error!(%trip_id, "load failed: {e}");
                Err(state.fail(Phase::LoadError, TripError::load(e)))
            }
        })
    }

    /// Validates, then creates or updates the trip. A newly created trip
    /// gets the staged files uploaded and attached in queue order.
    #[instrument(skip(self), fields(mode = %self.mode()))]
    pub async fn save(&self) -> Result<SaveOutcome, TripError> {
        let (payload, existing, files) = self.mutate("save", |state| {
            if let Err(e) = state.draft.validate() {
                warn!("save rejected: {e}");
                return Err(state.fail(Phase::Ready, e.into()));
            }
            let snapshot = (
                state.draft.to_payload(),
                state.trip_id.clone(),
                state.staged.files(),
            );
            state.phase = Phase::Saving;
            state.last_error = None;
            Ok(snapshot)
        })?;

        let (trip_id, created) = match existing {
            Some(trip_id) => match self.gateway.update_trip(&trip_id, &payload).await {
                Ok(_) => (trip_id, false),
                Err(e) => return self.save_failed(e),
            },
            None => match self.gateway.create_trip(&payload).await {
                Ok(Trip { id: Some(trip_id), .. }) => (trip_id, true),
                Ok(_) => {
                    return self.save_failed(GatewayError::InvalidResponse(
                        "created trip has no id".into(),
                    ))
                }
                Err(e) => return self.save_failed(e),
            },
        };

        if files.is_empty() {
            return self.update(|state| {
                state.trip_id = Some(trip_id.clone());
                state.phase = Phase::Saved;
                info!(%trip_id, created, "trip saved");
                Ok(SaveOutcome {
                    trip_id,
                    created,
                    attached: 0,
                })
            });
        }

        // Record the new id first so a retry updates instead of creating a
        // second trip.
        self.update(|state| {
            state.trip_id = Some(trip_id.clone());
            Ok(())
        })?;

        let report = flush_queue(&self.gateway, &trip_id, &files, || {
            self.state.borrow().phase != Phase::Closed
        })
        .await;
        self.update(|state| {
            state.staged.dispose_all();
            if let Some(media) = report.media.clone() {
                state.draft.media = media;
            }
            if let Some(auth) = report.authentication_failure() {
                return Err(state.fail(Phase::Ready, TripError::Authentication(auth.clone())));
            }
            if !report.is_complete() {
                error!(%trip_id, failed = report.failed(), "trip saved with missing media");
                return Err(state.fail(
                    Phase::Ready,
                    TripError::PartialMedia {
                        trip_id: trip_id.clone(),
                        attached: report.attached,
                        failed: report.failed(),
                    },
                ));
            }
            state.phase = Phase::Saved;
            info!(%trip_id, attached = report.attached, "trip saved");
            Ok(SaveOutcome {
                trip_id: trip_id.clone(),
                created,
                attached: report.attached,
            })
        })
    }

    fn save_failed<R>(&self, e: GatewayError) -> Result<R, TripError> {
        error!("save failed: {e}");
        self.update(|state| Err(state.fail(Phase::Ready, TripError::save(e))))
    }

    /// Deletes the trip after `confirmation` agrees. A not-found answer
    /// counts as deleted, and deleting again is a no-op.
    #[instrument(skip(self, confirmation))]
    pub async fn delete(&self, confirmation: &dyn Confirmation) -> Result<DeleteOutcome, TripError> {
        let (mode, phase) = {
            let state = self.state.borrow();
            (state.mode, state.phase)
        };
        if phase == Phase::Deleted {
            return Ok(DeleteOutcome::AlreadyDeleted);
        }
        if mode == EditorMode::Create {
            return Err(TripError::InvalidState {
                operation: "delete",
                reason: "trip has not been created",
            });
        }
        phase.check_editable("delete")?;
        if !confirmation.confirm(DELETE_PROMPT) {
            info!("delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        let trip_id = self.mutate("delete", |state| {
            let trip_id = state.trip_id.clone().ok_or(TripError::InvalidState {
                operation: "delete",
                reason: "no trip id",
            })?;
            state.phase = Phase::Deleting;
            state.last_error = None;
            Ok(trip_id)
        })?;

        let result = match self.gateway.delete_trip(&trip_id).await {
            Err(GatewayError::NotFound) => {
                warn!(%trip_id, "trip was already gone");
                Ok(())
            }
            other => other,
        };
        self.update(|state| match result {
            Ok(()) => {
                state.staged.dispose_all();
                state.phase = Phase::Deleted;
                info!(%trip_id, "trip deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) => {
                error!(%trip_id, "delete failed: {e}");
                Err(state.fail(Phase::Ready, TripError::delete(e)))
            }
        })
    }

    /// Edit mode: uploads `file`, attaches it, and adopts the service's
    /// media list. Returns that list.
    #[instrument(skip(self, file), fields(file = %file.name, size = file.len()))]
    pub async fn upload_immediate(&self, file: LocalFile) -> Result<Vec<MediaReference>, TripError> {
        let max = self.upload_limit();
        let trip_id = self.mutate("upload", |state| {
            let trip_id = match (&state.mode, &state.trip_id) {
                (EditorMode::Edit, Some(id)) => id.clone(),
                _ => {
                    return Err(TripError::InvalidState {
                        operation: "upload",
                        reason: "create-mode files are queued until the trip exists",
                    })
                }
            };
            file.check_size(max)?;
            state.phase = Phase::Uploading;
            state.last_error = None;
            Ok(trip_id)
        })?;

        let result = match self.gateway.upload_file(&file).await {
            Ok(media) => self.gateway.attach_media(&trip_id, &media).await,
            Err(e) => Err(e),
        };
        self.update(|state| match result {
            Ok(media) => {
                info!(%trip_id, count = media.len(), "media attached");
                state.draft.media = media.clone();
                state.phase = Phase::Ready;
                Ok(media)
            }
            Err(e) => {
                error!(%trip_id, "upload failed: {e}");
                Err(state.fail(Phase::Ready, TripError::upload(e)))
            }
        })
    }

    /// Queues the file in create mode, uploads it straight away in edit mode.
    pub async fn pick_file(&self, file: LocalFile) -> Result<(), TripError> {
        match self.mode() {
            EditorMode::Create => self.queue_file(file).map(|_| ()),
            EditorMode::Edit => self.upload_immediate(file).await.map(|_| ()),
        }
    }
}

impl<G> Drop for TripSession<G> {
    fn drop(&mut self) {
        self.teardown();
    }
}
