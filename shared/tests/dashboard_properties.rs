use std::collections::BTreeSet;

use proptest::prelude::*;

use shared::regions::US_STATE_CODES;
use shared::{region_visit_counts, stats, visited_regions, Rating, RegionId, Trip, US_STATE_COUNT};

fn arb_trip() -> impl Strategy<Value = Trip> {
    (
        proptest::collection::vec(proptest::sample::select(US_STATE_CODES.to_vec()), 0..8),
        0u8..=5,
    )
        .prop_map(|(codes, rating)| Trip {
            title: "trip".into(),
            regions: codes.into_iter().map(RegionId::from).collect(),
            rating: Rating::new(rating).unwrap_or_default(),
            ..Trip::default()
        })
}

proptest! {
    #[test]
    fn prop_visited_is_the_union(trips in proptest::collection::vec(arb_trip(), 0..12)) {
        let expected: BTreeSet<RegionId> = trips
            .iter()
            .flat_map(|trip| trip.regions.iter().cloned())
            .collect();
        let visited = visited_regions(&trips);

        prop_assert_eq!(visited.to_vec(), expected.into_iter().collect::<Vec<_>>());
        for trip in &trips {
            for region in &trip.regions {
                prop_assert!(visited.contains(region));
            }
        }
    }

    #[test]
    fn prop_stats_are_consistent(trips in proptest::collection::vec(arb_trip(), 0..12)) {
        let summary = stats(&trips, US_STATE_COUNT);

        prop_assert_eq!(summary.trip_count, trips.len());
        prop_assert_eq!(summary.visited_count + summary.remaining, US_STATE_COUNT);
        prop_assert_eq!(summary.visited_count, region_visit_counts(&trips).len());

        let rated: Vec<u8> = trips
            .iter()
            .map(|trip| trip.rating.value())
            .filter(|r| *r > 0)
            .collect();
        match summary.average_rating {
            None => prop_assert!(rated.is_empty()),
            Some(avg) => {
                prop_assert!(!rated.is_empty());
                prop_assert!((1.0..=5.0).contains(&avg));
            }
        }
    }
}
