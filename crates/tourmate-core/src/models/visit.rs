use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::catalog::lenient_id;

/// Prefix that marks a visit id as local-only.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Owner recorded on local visits made without a remote session.
pub const LOCAL_USER_ID: &str = "local_user";

/// A visit counts as location-verified within this distance (km).
pub const VERIFICATION_RADIUS_KM: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Destination,
    Delicacy,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Destination => "destination",
            EntityType::Delicacy => "delicacy",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "destination" | "destinations" => Ok(EntityType::Destination),
            "delicacy" | "delicacies" => Ok(EntityType::Delicacy),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    #[default]
    Manual,
    Location,
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationMethod::Manual => write!(f, "manual"),
            VerificationMethod::Location => write!(f, "location"),
        }
    }
}

/// Caller-supplied verification outcome. The ledger stores it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verification {
    pub verified: bool,
    pub method: VerificationMethod,
}

impl Verification {
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn location() -> Self {
        Self {
            verified: true,
            method: VerificationMethod::Location,
        }
    }

    /// Location-verified when a measured distance is within the radius.
    pub fn from_distance_km(distance_km: Option<f64>) -> Self {
        match distance_km {
            Some(d) if d <= VERIFICATION_RADIUS_KM => Self::location(),
            _ => Self::manual(),
        }
    }
}

/// One "visited" fact. Wire names follow the `user_visits` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct VisitRecord {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub entity_type: EntityType,
    #[serde(deserialize_with = "lenient_id")]
    pub entity_id: String,
    #[serde(rename = "visit_date")]
    pub visited_at: DateTime<Utc>,
    #[serde(rename = "visit_duration", default)]
    pub duration_minutes: Option<u32>,
    #[serde(rename = "visit_notes", default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub photos: Vec<String>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(rename = "is_verified", default)]
    pub verified: bool,
    #[serde(default, deserialize_with = "null_as_manual")]
    pub verification_method: VerificationMethod,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl VisitRecord {
    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Optional data supplied when marking a visit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitInput {
    pub verification: Verification,
    pub notes: Option<String>,
    pub rating: Option<u8>,
    pub duration_minutes: Option<u32>,
    pub photos: Vec<String>,
}

/// Editable fields of an existing visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisitPatch {
    #[serde(rename = "visit_notes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(rename = "visit_duration", skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<String>>,
}

impl VisitPatch {
    pub fn is_empty(&self) -> bool {
        self.notes.is_none()
            && self.rating.is_none()
            && self.duration_minutes.is_none()
            && self.photos.is_none()
    }

    pub(crate) fn apply_to(&self, record: &mut VisitRecord) {
        if let Some(ref notes) = self.notes {
            record.notes = Some(notes.clone());
        }
        if let Some(rating) = self.rating {
            record.rating = Some(rating);
        }
        if let Some(duration) = self.duration_minutes {
            record.duration_minutes = Some(duration);
        }
        if let Some(ref photos) = self.photos {
            record.photos = photos.clone();
        }
    }
}

/// Ratings are whole stars from 1 to 5.
pub fn is_valid_rating(rating: u8) -> bool {
    (1..=5).contains(&rating)
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

fn null_as_manual<'de, D: Deserializer<'de>>(d: D) -> Result<VerificationMethod, D::Error> {
    Ok(Option::<VerificationMethod>::deserialize(d)?.unwrap_or_default())
}
