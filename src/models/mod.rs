//! Data models
//!
//! This module contains the data structures used throughout the Natours core:
//! - Stored entities (Tour, User, Review)
//! - Geospatial value types
//! - Input types for writes
//! - Aggregation result shapes

mod geo;
mod review;
mod stats;
mod tour;
mod user;

pub use geo::{DistanceUnit, GeoParamError, GeoPoint, LatLng, Location, PointKind};
pub use review::{CreateReviewInput, Review};
pub use stats::{MonthlyPlan, TourDistance, TourStats};
pub use tour::{
    apply_virtuals, update_to_patch, CreateTourInput, Difficulty, Tour, UpdateTourInput,
    DEFAULT_RATINGS_AVERAGE,
};
pub use user::{CreateUserInput, User, UserRole};
