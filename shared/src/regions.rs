use std::collections::{BTreeSet, HashSet};

use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RegionId;

/// Postal codes of the 50 US states, in map order.
pub const US_STATE_CODES: [&str; 50] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY",
];

/// Property carrying the region code on each map feature.
const POSTAL_PROPERTY: &str = "postal";

/// Unordered, duplicate-free set of visited regions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionSet(BTreeSet<RegionId>);

impl RegionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `id` if present, adds it otherwise. Returns a new set and
    /// leaves `self` untouched so callers can compare old and new values.
    #[must_use]
    pub fn toggle(&self, id: &RegionId) -> Self {
        let mut next = self.0.clone();
        if !next.remove(id) {
            next.insert(id.clone());
        }
        Self(next)
    }

    #[must_use]
    pub fn contains(&self, id: &RegionId) -> bool {
        self.0.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionId> {
        self.0.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<RegionId> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<RegionId> for RegionSet {
    fn from_iter<I: IntoIterator<Item = RegionId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<RegionId> for RegionSet {
    fn extend<I: IntoIterator<Item = RegionId>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a RegionSet {
    type Item = &'a RegionId;
    type IntoIter = std::collections::btree_set::Iter<'a, RegionId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Error)]
pub enum RegionCatalogError {
    #[error("invalid GeoJSON: {0}")]
    Parse(#[from] geojson::Error),

    #[error("expected a FeatureCollection")]
    NotAFeatureCollection,

    #[error("feature {index} has no 'postal' property")]
    MissingCode { index: usize },

    #[error("catalog contains no regions")]
    Empty,
}

/// One clickable region for the map collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionToggle {
    pub id: RegionId,
    pub selected: bool,
}

/// The fixed universe of selectable regions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionCatalog {
    regions: Vec<RegionId>,
}

impl Default for RegionCatalog {
    fn default() -> Self {
        Self::us_states()
    }
}

impl RegionCatalog {
    #[must_use]
    pub fn us_states() -> Self {
        Self::new(US_STATE_CODES.iter().copied().map(RegionId::from))
    }

    /// Keeps first-seen order and drops repeated codes.
    pub fn new(ids: impl IntoIterator<Item = RegionId>) -> Self {
        let mut seen = HashSet::new();
        let regions = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { regions }
    }

    /// Builds a catalog from the map's boundary data: a FeatureCollection
    /// whose features each carry a `postal` code.
    pub fn from_geojson(source: &str) -> Result<Self, RegionCatalogError> {
        let GeoJson::FeatureCollection(collection) = source.parse::<GeoJson>()? else {
            return Err(RegionCatalogError::NotAFeatureCollection);
        };

        let mut ids = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.iter().enumerate() {
            let code = feature
                .properties
                .as_ref()
                .and_then(|props| props.get(POSTAL_PROPERTY))
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .ok_or(RegionCatalogError::MissingCode { index })?;
            ids.push(RegionId::new(code));
        }

        let catalog = Self::new(ids);
        if catalog.is_empty() {
            return Err(RegionCatalogError::Empty);
        }
        tracing::debug!(regions = catalog.len(), "region catalog loaded from GeoJSON");
        Ok(catalog)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &RegionId) -> bool {
        self.regions.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionId> {
        self.regions.iter()
    }

    /// Rows for the map. Selected ids the catalog does not know are simply
    /// absent.
    #[must_use]
    pub fn toggles(&self, selected: &RegionSet) -> Vec<RegionToggle> {
        self.regions
            .iter()
            .map(|id| RegionToggle {
                id: id.clone(),
                selected: selected.contains(id),
            })
            .collect()
    }

    /// Selected ids that the map cannot render.
    #[must_use]
    pub fn unknown_in(&self, selected: &RegionSet) -> Vec<RegionId> {
        selected
            .iter()
            .filter(|id| !self.contains(id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(ids: &[&str]) -> RegionSet {
        ids.iter().copied().map(RegionId::from).collect()
    }

    #[test]
    fn test_toggle_adds_then_removes() {
        let empty = RegionSet::new();
        let co = RegionId::from("CO");

        let with_co = empty.toggle(&co);
        assert!(with_co.contains(&co));
        assert!(empty.is_empty(), "input set must not change");

        let without = with_co.toggle(&co);
        assert!(!without.contains(&co));
        assert_eq!(with_co.len(), 1);
    }

    #[test]
    fn test_toggle_accepts_unknown_ids() {
        let catalog = RegionCatalog::us_states();
        let selected = set(&["CO"]).toggle(&RegionId::from("ATLANTIS"));

        assert_eq!(selected.len(), 2);
        let rows = catalog.toggles(&selected);
        assert_eq!(rows.len(), 50);
        assert_eq!(rows.iter().filter(|r| r.selected).count(), 1);
        assert_eq!(catalog.unknown_in(&selected), vec![RegionId::from("ATLANTIS")]);
    }

    #[test]
    fn test_us_catalog_has_fifty_states() {
        let catalog = RegionCatalog::us_states();
        assert_eq!(catalog.len(), crate::US_STATE_COUNT);
        assert!(catalog.contains(&RegionId::from("WY")));
        assert!(!catalog.contains(&RegionId::from("DC")));
    }

    #[test]
    fn test_catalog_from_geojson() {
        let source = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": null, "properties": {"postal": "CO", "name": "Colorado"}},
                {"type": "Feature", "geometry": null, "properties": {"postal": "UT", "name": "Utah"}},
                {"type": "Feature", "geometry": null, "properties": {"postal": "CO", "name": "Colorado"}}
            ]
        }"#;
        let catalog = RegionCatalog::from_geojson(source).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.iter().map(RegionId::as_str).collect::<Vec<_>>(),
            vec!["CO", "UT"]
        );
    }

    #[test]
    fn test_catalog_from_geojson_requires_codes() {
        let source = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": null, "properties": {"name": "Nowhere"}}
            ]
        }"#;
        assert!(matches!(
            RegionCatalog::from_geojson(source),
            Err(RegionCatalogError::MissingCode { index: 0 })
        ));

        let point = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        assert!(matches!(
            RegionCatalog::from_geojson(point),
            Err(RegionCatalogError::NotAFeatureCollection)
        ));
    }

    proptest! {
        #[test]
        fn prop_toggle_is_its_own_inverse(
            ids in proptest::collection::vec("[A-Z]{2}", 0..20),
            r in "[A-Z]{2}",
        ) {
            let start: RegionSet = ids.into_iter().map(RegionId::new).collect();
            let r = RegionId::new(r);
            prop_assert_eq!(start.toggle(&r).toggle(&r), start);
        }

        #[test]
        fn prop_toggle_flips_membership_only_for_target(
            ids in proptest::collection::vec("[A-Z]{2}", 0..20),
            r in "[A-Z]{2}",
        ) {
            let start: RegionSet = ids.into_iter().map(RegionId::new).collect();
            let r = RegionId::new(r);
            let next = start.toggle(&r);
            prop_assert_eq!(next.contains(&r), !start.contains(&r));
            for id in start.iter().filter(|id| **id != r) {
                prop_assert!(next.contains(id));
            }
        }
    }
}
