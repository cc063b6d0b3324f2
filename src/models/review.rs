//! Review model
//!
//! A review points at its tour and author. Tours never store review ids; the
//! `reviews` field of a tour is resolved by looking reviews up by `tour`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Review entity as stored in the `reviews` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub review: String,
    /// 1 to 5
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    /// Parent tour id
    pub tour: String,
    /// Author user id
    pub user: String,
}

/// Input for creating a review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewInput {
    pub review: String,
    pub rating: f64,
    pub tour: String,
    pub user: String,
}

impl CreateReviewInput {
    pub fn new(
        review: impl Into<String>,
        rating: f64,
        tour: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            review: review.into(),
            rating,
            tour: tour.into(),
            user: user.into(),
        }
    }
}
