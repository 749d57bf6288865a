use std::fmt;

use bytes::Bytes;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;
use crate::regions::RegionSet;
use crate::MAX_RATING;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

typed_id!(
    /// Server-assigned trip identifier.
    TripId
);
typed_id!(
    /// Opaque region code, e.g. a US state postal code.
    RegionId
);

/// Star rating in `0..=5`; `0` means the trip is unrated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const UNRATED: Self = Self(0);

    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if value > MAX_RATING {
            return Err(ValidationError::RatingOutOfRange(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_rated(self) -> bool {
        self.0 > 0
    }

    /// Star count, or `None` for an unrated trip.
    #[must_use]
    pub const fn stars(self) -> Option<u8> {
        if self.is_rated() {
            Some(self.0)
        } else {
            None
        }
    }

    #[must_use]
    pub fn label(self) -> String {
        match self.stars() {
            Some(n) => format!("{n}/{MAX_RATING}"),
            None => "No rating".into(),
        }
    }
}

impl TryFrom<u8> for Rating {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// Videos are recognised by a `video/` MIME type; with no MIME type the
    /// filename extension is consulted. Everything else is an image.
    #[must_use]
    pub fn classify(content_type: Option<&str>, filename: &str) -> Self {
        let is_video = match content_type.map(str::trim).filter(|c| !c.is_empty()) {
            Some(mime) => mime.to_ascii_lowercase().starts_with("video/"),
            None => mime_guess::from_path(filename)
                .first()
                .is_some_and(|mime| mime.type_().as_str() == "video"),
        };
        if is_video {
            Self::Video
        } else {
            Self::Image
        }
    }
}

/// A server-confirmed upload attached (or attachable) to a trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub filename: String,
}

/// A file picked by the user, not yet uploaded.
#[derive(Clone)]
pub struct LocalFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn media_type(&self) -> MediaType {
        MediaType::classify(self.content_type.as_deref(), &self.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// MIME type to declare on upload.
    #[must_use]
    pub fn mime(&self) -> String {
        self.content_type
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&self.name)
                    .first_or_octet_stream()
                    .to_string()
            })
    }

    pub(crate) fn check_size(&self, max: usize) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyFile {
                name: self.name.clone(),
            });
        }
        if self.len() > max {
            return Err(ValidationError::FileTooLarge {
                name: self.name.clone(),
                size: self.len(),
                max,
            });
        }
        Ok(())
    }
}

// File contents stay out of logs.
impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Trip record as returned by the remote service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TripId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(rename = "states", default, deserialize_with = "null_as_default")]
    pub regions: RegionSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rating: Rating,
    #[serde(
        default,
        deserialize_with = "calendar_date::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "calendar_date::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "photos", default, deserialize_with = "null_as_default")]
    pub photo_urls: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub media: Vec<MediaReference>,
}

/// Body of create and update calls.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripPayload {
    pub title: String,
    #[serde(rename = "states")]
    pub regions: RegionSet,
    pub comment: String,
    pub rating: Rating,
    #[serde(rename = "photos")]
    pub photo_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Dates travel as `YYYY-MM-DD`, but the service may echo full ISO
/// timestamps back; only the calendar day is kept. A date that cannot be
/// read is dropped rather than failing the whole record.
mod calendar_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use tracing::warn;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(raw)) => raw,
            Some(other) => {
                warn!(value = %other, "ignoring non-text trip date");
                return Ok(None);
            }
        };
        Ok(parse(&raw))
    }

    pub(super) fn parse(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let day = raw.get(..10).unwrap_or(raw);
        match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(e) => {
                warn!(value = raw, "ignoring unreadable trip date: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::new(0).is_ok());
        assert!(Rating::new(5).is_ok());
        assert_eq!(Rating::new(6), Err(ValidationError::RatingOutOfRange(6)));
        assert_eq!(Rating::UNRATED.stars(), None);
        assert_eq!(Rating::new(4).map(Rating::label), Ok("4/5".to_string()));
        assert_eq!(Rating::UNRATED.label(), "No rating");
    }

    #[test]
    fn test_media_type_classification() {
        assert_eq!(MediaType::classify(Some("video/mp4"), "a.bin"), MediaType::Video);
        assert_eq!(MediaType::classify(Some("image/png"), "clip.mp4"), MediaType::Image);
        assert_eq!(MediaType::classify(None, "clip.mp4"), MediaType::Video);
        assert_eq!(MediaType::classify(Some(""), "beach.jpg"), MediaType::Image);
        assert_eq!(MediaType::classify(None, "notes"), MediaType::Image);
    }

    #[test]
    fn test_trip_hydrates_from_sparse_record() {
        let trip: Trip = serde_json::from_value(serde_json::json!({
            "_id": "abc123",
            "title": "Colorado Weekend",
            "states": ["CO", "UT", "CO"],
            "rating": null,
            "startDate": "2024-06-01T00:00:00.000Z",
            "endDate": "",
        }))
        .unwrap();

        assert_eq!(trip.id, Some(TripId::new("abc123")));
        assert_eq!(trip.regions.len(), 2);
        assert_eq!(trip.rating, Rating::UNRATED);
        assert_eq!(trip.start_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(trip.end_date, None);
        assert!(trip.photo_urls.is_empty());
        assert!(trip.media.is_empty());
        assert!(trip.comment.is_empty());
    }

    #[test]
    fn test_unreadable_dates_are_dropped() {
        let trips: Vec<Trip> = serde_json::from_value(serde_json::json!([
            {"_id": "a", "title": "Arches", "states": ["UT"], "startDate": "06/01/2024"},
            {"_id": "b", "title": "Rockies", "states": ["CO"], "rating": 4,
             "startDate": "2024-06-01", "endDate": 20240603},
        ]))
        .unwrap();

        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].start_date, None);
        assert_eq!(trips[1].start_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(trips[1].end_date, None);
        assert_eq!(trips[1].rating.value(), 4);
        assert_eq!(calendar_date::parse(" 2024-02-30 "), None);
        assert_eq!(calendar_date::parse("2024-02-29T08:00:00Z"), NaiveDate::from_ymd_opt(2024, 2, 29));
    }

    #[test]
    fn test_trip_rejects_out_of_range_rating() {
        let result: Result<Trip, _> = serde_json::from_value(serde_json::json!({ "rating": 9 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_omits_missing_dates() {
        let payload = TripPayload {
            title: "Road trip".into(),
            regions: ["TX", "NM"].into_iter().map(RegionId::from).collect(),
            comment: String::new(),
            rating: Rating::new(3).unwrap(),
            photo_urls: vec!["https://img.example.com/1.jpg".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 3, 9),
            end_date: None,
        };
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["states"], serde_json::json!(["NM", "TX"]));
        assert_eq!(json["photos"][0], "https://img.example.com/1.jpg");
        assert_eq!(json["rating"], 3);
        assert_eq!(json["startDate"], "2024-03-09");
        assert!(json.get("endDate").is_none());
    }

    #[test]
    fn test_local_file_debug_hides_contents() {
        let file = LocalFile::new("secret.jpg", Some("image/jpeg".into()), vec![1u8, 2, 3]);
        let debug = format!("{file:?}");
        assert!(debug.contains("size: 3"));
        assert!(!debug.contains("[1, 2, 3]"));
    }

    #[test]
    fn test_local_file_size_checks() {
        let empty = LocalFile::new("a.jpg", None, Vec::<u8>::new());
        assert!(matches!(empty.check_size(10), Err(ValidationError::EmptyFile { .. })));

        let big = LocalFile::new("b.jpg", None, vec![0u8; 11]);
        assert!(matches!(big.check_size(10), Err(ValidationError::FileTooLarge { size: 11, .. })));
        assert!(big.check_size(11).is_ok());
    }
}
