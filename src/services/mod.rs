//! Services layer - Business logic
//!
//! Services sit between callers and repositories:
//! - Validating input before any write
//! - Routing every query through the hook chain
//! - Mapping store failures to typed errors

pub mod api_features;
pub mod tour;
pub mod validation;

pub use api_features::{default_projection, ListParams, DEFAULT_SORT, HIDDEN_FIELDS};
pub use tour::{
    monthly_plan_pipeline, stats_pipeline, ErrorKind, TourService, TourServiceError, STATS_MIN_RATING,
};
pub use validation::{
    round_rating, validate_new_tour, validate_tour_patch, FieldError, ValidationErrors,
};
