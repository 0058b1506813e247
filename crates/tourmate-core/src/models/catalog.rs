//! Content collections served through the resource caches.
//!
//! Rows come straight from the backend and are loosely typed (numbers may be
//! strings, most columns may be null). Each item deserializes through a raw
//! row type and is normalised once, so the rest of the crate only sees the
//! display-ready shape.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::change::Collection;

/// Weight applied to the rating in the composite popularity score.
const RATING_WEIGHT: f64 = 0.7;

/// Weight applied to the (capped) review count in the composite score.
const REVIEW_WEIGHT: f64 = 0.3;

/// Review counts above this stop contributing to the score.
const REVIEW_COUNT_CAP: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Shared behaviour of every cached content type.
pub trait CatalogItem: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Remote ordering for a full fetch, as (column, ascending) pairs.
    const ORDERING: &'static [(&'static str, bool)];

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn rating(&self) -> f64;
    fn review_count(&self) -> u32;
    fn is_featured(&self) -> bool;
    fn coordinates(&self) -> Option<Coordinates>;

    /// Composite popularity score: `0.7 * rating + 0.3 * min(review_count, 100)`.
    fn popularity_score(&self) -> f64 {
        RATING_WEIGHT * self.rating()
            + REVIEW_WEIGHT * f64::from(self.review_count().min(REVIEW_COUNT_CAP))
    }
}

// ============================================================================
// Destinations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DestinationRow")]
pub struct Destination {
    pub id: String,
    pub name: String,
    pub location: String,
    pub description: String,
    pub category: String,
    pub image_url: Option<String>,
    pub rating: f64,
    pub review_count: u32,
    pub featured: bool,
    pub is_active: bool,
    pub coordinates: Option<Coordinates>,
    pub entrance_fee: Option<String>,
    pub opening_hours: Option<String>,
    pub contact_number: Option<String>,
    pub website: Option<String>,
    pub amenities: Vec<String>,
    pub accessibility_features: Vec<String>,
    pub best_time_to_visit: Option<String>,
    pub estimated_duration: Option<String>,
    pub difficulty_level: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DestinationRow {
    #[serde(deserialize_with = "lenient_id")]
    id: String,
    name: Option<String>,
    location: Option<String>,
    description: Option<String>,
    category: Option<String>,
    image_url: Option<String>,
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_f64")]
    rating: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u32")]
    review_count: Option<u32>,
    featured: Option<bool>,
    is_active: Option<bool>,
    coordinates: Option<Coordinates>,
    #[serde(default, deserialize_with = "lenient_string")]
    entrance_fee: Option<String>,
    opening_hours: Option<String>,
    contact_number: Option<String>,
    website: Option<String>,
    amenities: Option<Vec<String>>,
    accessibility_features: Option<Vec<String>>,
    best_time_to_visit: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    estimated_duration: Option<String>,
    difficulty_level: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<DestinationRow> for Destination {
    fn from(row: DestinationRow) -> Self {
        Self {
            image_url: pick_image(row.image_url, row.images),
            id: row.id,
            name: non_empty_or(row.name, "Unnamed Destination"),
            location: non_empty_or(row.location, "Unknown Location"),
            description: non_empty_or(row.description, "No description available"),
            category: non_empty_or(row.category, "Uncategorized"),
            rating: row.rating.unwrap_or(0.0),
            review_count: row.review_count.unwrap_or(0),
            featured: row.featured.unwrap_or(false),
            is_active: row.is_active.unwrap_or(true),
            coordinates: row.coordinates,
            entrance_fee: row.entrance_fee,
            opening_hours: row.opening_hours,
            contact_number: row.contact_number,
            website: row.website,
            amenities: row.amenities.unwrap_or_default(),
            accessibility_features: row.accessibility_features.unwrap_or_default(),
            best_time_to_visit: row.best_time_to_visit,
            estimated_duration: row.estimated_duration,
            difficulty_level: non_empty_or(row.difficulty_level, "Easy"),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl CatalogItem for Destination {
    const COLLECTION: Collection = Collection::Destinations;
    const ORDERING: &'static [(&'static str, bool)] = &[("featured", false), ("created_at", false)];

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rating(&self) -> f64 {
        self.rating
    }

    fn review_count(&self) -> u32 {
        self.review_count
    }

    fn is_featured(&self) -> bool {
        self.featured
    }

    fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }
}

// ============================================================================
// Delicacies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DelicacyRow")]
pub struct Delicacy {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Place of origin (`origin` column on the backend).
    pub location: String,
    pub category: String,
    pub image_url: Option<String>,
    pub price: Option<String>,
    pub rating: f64,
    pub review_count: u32,
    pub featured: bool,
    pub is_active: bool,
    pub coordinates: Option<Coordinates>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DelicacyRow {
    #[serde(deserialize_with = "lenient_id")]
    id: String,
    name: Option<String>,
    description: Option<String>,
    #[serde(alias = "location")]
    origin: Option<String>,
    category: Option<String>,
    image_url: Option<String>,
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string")]
    price: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    rating: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u32")]
    review_count: Option<u32>,
    featured: Option<bool>,
    is_active: Option<bool>,
    coordinates: Option<Coordinates>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<DelicacyRow> for Delicacy {
    fn from(row: DelicacyRow) -> Self {
        Self {
            image_url: pick_image(row.image_url, row.images),
            id: row.id,
            name: non_empty_or(row.name, "Unnamed Delicacy"),
            description: non_empty_or(row.description, "No description available"),
            location: non_empty_or(row.origin, "Cebu"),
            category: non_empty_or(row.category, "Food/Beverage"),
            price: row.price,
            rating: row.rating.unwrap_or(0.0),
            review_count: row.review_count.unwrap_or(0),
            featured: row.featured.unwrap_or(false),
            is_active: row.is_active.unwrap_or(true),
            coordinates: row.coordinates,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl CatalogItem for Delicacy {
    const COLLECTION: Collection = Collection::Delicacies;
    const ORDERING: &'static [(&'static str, bool)] = &[("created_at", false)];

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rating(&self) -> f64 {
        self.rating
    }

    fn review_count(&self) -> u32 {
        self.review_count
    }

    fn is_featured(&self) -> bool {
        self.featured
    }

    fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }
}

// ============================================================================
// Row normalisation helpers
// ============================================================================

fn non_empty_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn pick_image(image_url: Option<String>, images: Option<Vec<String>>) -> Option<String> {
    image_url
        .filter(|url| !url.trim().is_empty())
        .or_else(|| images.and_then(|list| list.into_iter().next()))
}

/// Ids may be uuids or integers depending on the table.
pub(crate) fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
    }
}

/// Numbers or numeric strings. "NaN" and "inf" parse as floats but are not
/// ratings, so non-finite values read as absent.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
