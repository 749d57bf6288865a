// lib.rs - Trip editing core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod model;
pub mod regions;
pub mod session;
pub mod staging;
pub mod view;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{ConfigError, GatewayConfig};
pub use dashboard::{
    load_dashboard, region_visit_counts, stats, visited_regions, DashboardStats, DashboardSummary,
};
pub use error::{TripError, ValidationError};
pub use gateway::{Credential, GatewayError, HttpTransport, HttpTripGateway, TripGateway};
pub use model::{LocalFile, MediaReference, MediaType, Rating, RegionId, Trip, TripId, TripPayload};
pub use regions::{RegionCatalog, RegionSet, RegionToggle};
pub use session::{
    Confirmation, DeleteOutcome, EditorMode, EditorState, Phase, SaveOutcome, TripDraft,
    TripSession,
};
pub use staging::{flush_queue, FlushReport, PreviewHandle, PreviewProvider, StagingQueue};
pub use view::TripView;

/// Size of the default region universe.
pub const US_STATE_COUNT: usize = 50;
pub const MAX_RATING: u8 = 5;
pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_COMMENT_LENGTH: usize = 10_000;
pub const MAX_PHOTO_URLS: usize = 100;
