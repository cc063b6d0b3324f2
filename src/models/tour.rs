//! Tour model
//!
//! This module provides:
//! - `Tour` entity, the stored document shape
//! - `Difficulty` enum
//! - Input types for creating and updating tours
//! - Read-time virtual fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::geo::{GeoPoint, Location};

/// Default rating for a tour without reviews
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

/// Tour entity
///
/// Serialized with camelCase keys; the serialized form is the document kept
/// in the store and the shape every filter path refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    /// Opaque identifier assigned at insert
    pub id: String,
    pub name: String,
    /// Derived from `name` by the write hooks
    #[serde(default)]
    pub slug: String,
    /// Length in days
    pub duration: u32,
    pub max_group_size: u32,
    pub difficulty: Difficulty,
    /// Always one decimal, within [1, 5]
    pub ratings_average: f64,
    pub ratings_quantity: u32,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<Location>,
    /// User ids of the tour guides
    #[serde(default)]
    pub guides: Vec<String>,
}

impl Tour {
    /// Length in weeks; never stored
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }

    /// Convert into the stored document form
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Read a full tour back from a stored document
    ///
    /// Fails on projected documents that lack required fields.
    pub fn from_document(doc: Value) -> serde_json::Result<Self> {
        serde_json::from_value(doc)
    }
}

/// Tour difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    /// All accepted values, in display order
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Difficult];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }

    /// Parse the stored representation; matching is exact
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "difficult" => Some(Difficulty::Difficult),
            _ => None,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input for creating a new tour
///
/// Every required field is optional here so that validation can report all
/// missing fields at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTourInput {
    pub name: Option<String>,
    pub duration: Option<u32>,
    pub max_group_size: Option<u32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<u32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Vec<String>,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<Location>,
    pub guides: Vec<String>,
}

impl CreateTourInput {
    /// Create an input carrying every required field
    pub fn new(
        name: impl Into<String>,
        duration: u32,
        max_group_size: u32,
        difficulty: Difficulty,
        price: f64,
        summary: impl Into<String>,
        image_cover: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            duration: Some(duration),
            max_group_size: Some(max_group_size),
            difficulty: Some(difficulty.as_str().to_string()),
            price: Some(price),
            summary: Some(summary.into()),
            image_cover: Some(image_cover.into()),
            ..Self::default()
        }
    }

    pub fn with_price_discount(mut self, discount: f64) -> Self {
        self.price_discount = Some(discount);
        self
    }

    pub fn with_ratings(mut self, average: f64, quantity: u32) -> Self {
        self.ratings_average = Some(average);
        self.ratings_quantity = Some(quantity);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_start_dates(mut self, dates: Vec<DateTime<Utc>>) -> Self {
        self.start_dates = dates;
        self
    }

    pub fn with_start_location(mut self, location: GeoPoint) -> Self {
        self.start_location = Some(location);
        self
    }

    pub fn with_locations(mut self, locations: Vec<Location>) -> Self {
        self.locations = locations;
        self
    }

    pub fn with_guides(mut self, guides: Vec<String>) -> Self {
        self.guides = guides;
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret_tour = Some(true);
        self
    }
}

/// Input for a partial tour update
///
/// Only the supplied fields are validated and written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateTourInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_group_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratings_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratings_quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_cover: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_tour: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guides: Option<Vec<String>>,
}

/// Attach read-time virtual fields to a tour document
///
/// `durationWeeks` is only computed when `duration` survived projection.
pub fn apply_virtuals(doc: &mut Value) {
    if let Value::Object(map) = doc {
        if let Some(duration) = map.get("duration").and_then(Value::as_f64) {
            map.insert("durationWeeks".to_string(), Value::from(duration / 7.0));
        }
    }
}

/// Convert a patch into a document map, dropping absent fields
pub fn update_to_patch(input: &UpdateTourInput) -> serde_json::Result<Map<String, Value>> {
    match serde_json::to_value(input)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
