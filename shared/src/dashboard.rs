//! Read-only summaries over a user's trips.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::TripError;
use crate::gateway::TripGateway;
use crate::model::{RegionId, Trip};
use crate::regions::{RegionCatalog, RegionSet, RegionToggle};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub trip_count: usize,
    pub visited_count: usize,
    pub remaining: usize,
    /// Mean over rated trips; `None` when no trip is rated.
    pub average_rating: Option<f64>,
}

impl DashboardStats {
    /// One decimal place, or a dash when nothing is rated.
    #[must_use]
    pub fn average_label(&self) -> String {
        self.average_rating
            .map_or_else(|| "\u{2014}".to_string(), |avg| format!("{avg:.1}"))
    }
}

/// Union of every trip's regions.
#[must_use]
pub fn visited_regions(trips: &[Trip]) -> RegionSet {
    trips
        .iter()
        .flat_map(|trip| trip.regions.iter().cloned())
        .collect()
}

#[must_use]
pub fn stats(trips: &[Trip], total_regions: usize) -> DashboardStats {
    let visited_count = visited_regions(trips).len();
    let (sum, rated) = trips
        .iter()
        .filter(|trip| trip.rating.is_rated())
        .fold((0u32, 0u32), |(sum, rated), trip| {
            (sum + u32::from(trip.rating.value()), rated + 1)
        });

    DashboardStats {
        trip_count: trips.len(),
        visited_count,
        remaining: total_regions.saturating_sub(visited_count),
        average_rating: (rated > 0).then(|| f64::from(sum) / f64::from(rated)),
    }
}

/// How many trips include each region.
#[must_use]
pub fn region_visit_counts(trips: &[Trip]) -> BTreeMap<RegionId, usize> {
    let mut counts = BTreeMap::new();
    for region in trips.iter().flat_map(|trip| trip.regions.iter()) {
        *counts.entry(region.clone()).or_insert(0) += 1;
    }
    counts
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DashboardSummary {
    pub trips: Vec<Trip>,
    pub visited: RegionSet,
    pub stats: DashboardStats,
    pub visit_counts: BTreeMap<RegionId, usize>,
    /// Map rows for the catalog with visited regions selected.
    pub map: Vec<RegionToggle>,
}

impl DashboardSummary {
    #[must_use]
    pub fn new(trips: Vec<Trip>, catalog: &RegionCatalog) -> Self {
        let visited = visited_regions(&trips);
        Self {
            stats: stats(&trips, catalog.len()),
            visit_counts: region_visit_counts(&trips),
            map: catalog.toggles(&visited),
            visited,
            trips,
        }
    }
}

/// Lists the caller's trips and folds them into a summary.
#[instrument(skip_all)]
pub async fn load_dashboard<G>(
    gateway: &G,
    catalog: &RegionCatalog,
) -> Result<DashboardSummary, TripError>
where
    G: TripGateway + ?Sized,
{
    let trips = gateway.list_trips().await.map_err(|e| {
        error!("listing trips failed: {e}");
        TripError::load(e)
    })?;
    let summary = DashboardSummary::new(trips, catalog);
    info!(
        trips = summary.stats.trip_count,
        visited = summary.stats.visited_count,
        "dashboard loaded"
    );
    Ok(summary)
}
