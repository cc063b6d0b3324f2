//! Tour validation
//!
//! Every field has an independent rule; the discount rule receives both
//! prices explicitly. All violations are collected before failing so callers
//! see the complete list.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::models::{
    CreateTourInput, Difficulty, GeoPoint, Location, Tour, UpdateTourInput, DEFAULT_RATINGS_AVERAGE,
};

pub const NAME_MIN_LEN: usize = 10;
pub const NAME_MAX_LEN: usize = 40;
pub const RATING_MIN: f64 = 1.0;
pub const RATING_MAX: f64 = 5.0;

/// A single violated constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    /// Rule spanning several fields (discount below price)
    pub cross_field: bool,
}

/// Every constraint a candidate document violated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single per-field violation
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
            cross_field: false,
        });
    }

    fn add_cross_field(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
            cross_field: true,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether `field` has at least one violation
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// True when every violation is a cross-field rule
    pub fn only_cross_field(&self) -> bool {
        !self.errors.is_empty() && self.errors.iter().all(|e| e.cross_field)
    }

    fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "Invalid input data. {}", messages.join(". "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Round to one decimal, as ratings are stored
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string())
}

fn check_required_text(errors: &mut ValidationErrors, field: &str, value: Option<&str>, message: &str) {
    if value.map_or(true, str::is_empty) {
        errors.add(field, message);
    }
}

fn check_name(errors: &mut ValidationErrors, name: &str) {
    let len = name.chars().count();
    if len > NAME_MAX_LEN {
        errors.add("name", "A tour name must have less or equal to 40 characters");
    } else if len < NAME_MIN_LEN {
        errors.add("name", "A tour name must have more or equal to 10 characters");
    }
}

fn check_difficulty(errors: &mut ValidationErrors, value: &str) -> Option<Difficulty> {
    let difficulty = Difficulty::from_str(value.trim());
    if difficulty.is_none() {
        errors.add("difficulty", "Difficulty is either easy, medium or difficult");
    }
    difficulty
}

fn check_rating(errors: &mut ValidationErrors, value: f64) -> f64 {
    if !value.is_finite() {
        errors.add("ratingsAverage", "Rating must be a number");
        return value;
    }
    let rounded = round_rating(value);
    if rounded < RATING_MIN {
        errors.add("ratingsAverage", "Rating must be above 1.0");
    } else if rounded > RATING_MAX {
        errors.add("ratingsAverage", "Rating must be below 5.0");
    }
    rounded
}

fn check_finite(errors: &mut ValidationErrors, field: &str, value: f64) {
    if !value.is_finite() {
        errors.add(field, format!("{} must be a finite number", field));
    }
}

/// `priceDiscount < price`
fn check_discount(errors: &mut ValidationErrors, price: f64, discount: f64) {
    if discount.is_finite() && price.is_finite() && discount >= price {
        errors.add_cross_field(
            "priceDiscount",
            format!("Discount price ({}) should be below the regular price", discount),
        );
    }
}

fn check_point(errors: &mut ValidationErrors, field: &str, point: &GeoPoint) {
    let [lng, lat] = point.coordinates;
    let valid = lng.is_finite() && lat.is_finite() && lng.abs() <= 180.0 && lat.abs() <= 90.0;
    if !valid {
        errors.add(
            format!("{}.coordinates", field),
            "Coordinates must be [lng, lat] with lng within [-180, 180] and lat within [-90, 90]",
        );
    }
}

fn check_locations(errors: &mut ValidationErrors, locations: &[Location]) {
    for (i, location) in locations.iter().enumerate() {
        check_point(errors, &format!("locations.{}", i), &location.point);
    }
}

/// Validate a create request and build the tour to insert
///
/// Applies defaults, trims text fields and rounds the rating. The slug is
/// left empty for the write hooks.
pub fn validate_new_tour(
    input: &CreateTourInput,
    id: String,
    now: DateTime<Utc>,
) -> Result<Tour, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let name = trimmed(input.name.as_ref());
    check_required_text(&mut errors, "name", name.as_deref(), "A tour must have a name");
    if let Some(name) = name.as_deref().filter(|n| !n.is_empty()) {
        check_name(&mut errors, name);
    }

    if input.duration.is_none() {
        errors.add("duration", "A tour must have a duration");
    }
    if input.max_group_size.is_none() {
        errors.add("maxGroupSize", "A tour must have a group size");
    }

    let difficulty = match input.difficulty.as_deref() {
        Some(value) if !value.trim().is_empty() => check_difficulty(&mut errors, value),
        _ => {
            errors.add("difficulty", "A tour must have a difficulty");
            None
        }
    };

    let ratings_average = input
        .ratings_average
        .map(|r| check_rating(&mut errors, r))
        .unwrap_or(DEFAULT_RATINGS_AVERAGE);

    match input.price {
        Some(price) => check_finite(&mut errors, "price", price),
        None => errors.add("price", "A tour must have a price"),
    }
    if let Some(discount) = input.price_discount {
        check_finite(&mut errors, "priceDiscount", discount);
        if let Some(price) = input.price {
            check_discount(&mut errors, price, discount);
        }
    }

    let summary = trimmed(input.summary.as_ref());
    check_required_text(&mut errors, "summary", summary.as_deref(), "A tour must have a description");

    let image_cover = input.image_cover.as_ref().map(|s| s.trim().to_string());
    check_required_text(
        &mut errors,
        "imageCover",
        image_cover.as_deref(),
        "A tour must have a cover image",
    );

    if let Some(start) = &input.start_location {
        check_point(&mut errors, "startLocation", start);
    }
    check_locations(&mut errors, &input.locations);

    let (Some(name), Some(duration), Some(max_group_size), Some(difficulty), Some(price), Some(summary), Some(image_cover)) = (
        name,
        input.duration,
        input.max_group_size,
        difficulty,
        input.price,
        summary,
        image_cover,
    ) else {
        return Err(errors);
    };

    let tour = Tour {
        id,
        name,
        slug: String::new(),
        duration,
        max_group_size,
        difficulty,
        ratings_average,
        ratings_quantity: input.ratings_quantity.unwrap_or(0),
        price,
        price_discount: input.price_discount,
        summary,
        description: trimmed(input.description.as_ref()).filter(|d| !d.is_empty()),
        image_cover,
        images: input.images.clone(),
        created_at: now,
        start_dates: input.start_dates.clone(),
        secret_tour: input.secret_tour.unwrap_or(false),
        start_location: input.start_location.clone(),
        locations: input.locations.clone(),
        guides: input.guides.clone(),
    };

    errors.into_result(tour)
}

/// Validate a partial update, re-running only the rules of supplied fields
///
/// With `current` set, the discount rule is checked against the document as
/// it will look after the update.
pub fn validate_tour_patch(
    input: &UpdateTourInput,
    current: Option<&Value>,
) -> Result<UpdateTourInput, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut patch = input.clone();

    if let Some(name) = &input.name {
        let name = name.trim().to_string();
        check_required_text(&mut errors, "name", Some(name.as_str()), "A tour must have a name");
        if !name.is_empty() {
            check_name(&mut errors, &name);
        }
        patch.name = Some(name);
    }

    if let Some(difficulty) = &input.difficulty {
        if let Some(parsed) = check_difficulty(&mut errors, difficulty) {
            patch.difficulty = Some(parsed.as_str().to_string());
        }
    }

    if let Some(rating) = input.ratings_average {
        patch.ratings_average = Some(check_rating(&mut errors, rating));
    }

    if let Some(price) = input.price {
        check_finite(&mut errors, "price", price);
    }
    if let Some(discount) = input.price_discount {
        check_finite(&mut errors, "priceDiscount", discount);
    }

    if let Some(summary) = &input.summary {
        let summary = summary.trim().to_string();
        check_required_text(&mut errors, "summary", Some(summary.as_str()), "A tour must have a description");
        patch.summary = Some(summary);
    }
    if let Some(description) = &input.description {
        patch.description = Some(description.trim().to_string());
    }
    if let Some(image_cover) = &input.image_cover {
        let image_cover = image_cover.trim().to_string();
        check_required_text(&mut errors, "imageCover", Some(image_cover.as_str()), "A tour must have a cover image");
        patch.image_cover = Some(image_cover);
    }

    if let Some(start) = &input.start_location {
        check_point(&mut errors, "startLocation", start);
    }
    if let Some(locations) = &input.locations {
        check_locations(&mut errors, locations);
    }

    if let Some(current) = current {
        let price = input.price.or_else(|| current.get("price").and_then(Value::as_f64));
        let discount = input
            .price_discount
            .or_else(|| current.get("priceDiscount").and_then(Value::as_f64));
        if let (Some(price), Some(discount)) = (price, discount) {
            check_discount(&mut errors, price, discount);
        }
    }

    errors.into_result(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn valid_input() -> CreateTourInput {
        CreateTourInput::new(
            "The Forest Hiker",
            5,
            25,
            Difficulty::Easy,
            397.0,
            "Breathtaking hike through the Canadian Banff National Park",
            "tour-1-cover.jpg",
        )
    }

    fn validate(input: &CreateTourInput) -> Result<Tour, ValidationErrors> {
        validate_new_tour(input, "t1".to_string(), Utc::now())
    }

    #[test]
    fn test_valid_input_applies_defaults() {
        let tour = validate(&valid_input()).unwrap();

        assert_eq!(tour.ratings_average, 4.5);
        assert_eq!(tour.ratings_quantity, 0);
        assert!(!tour.secret_tour);
        assert_eq!(tour.difficulty, Difficulty::Easy);
        assert!(tour.slug.is_empty());
    }

    #[test]
    fn test_trims_text_fields() {
        let mut input = valid_input();
        input.name = Some("   The Forest Hiker   ".into());
        input.description = Some("  Long walk.  ".into());

        let tour = validate(&input).unwrap();

        assert_eq!(tour.name, "The Forest Hiker");
        assert_eq!(tour.description.as_deref(), Some("Long walk."));
    }

    #[test]
    fn test_reports_every_missing_field() {
        let err = validate(&CreateTourInput::default()).unwrap_err();
        let fields: Vec<&str> = err.errors().iter().map(|e| e.field.as_str()).collect();

        assert_eq!(
            fields,
            vec!["name", "duration", "maxGroupSize", "difficulty", "price", "summary", "imageCover"]
        );
        assert!(err.to_string().starts_with("Invalid input data. A tour must have a name. "));
    }

    #[test]
    fn test_blank_name_is_missing() {
        let mut input = valid_input();
        input.name = Some("    ".into());

        let err = validate(&input).unwrap_err();

        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.errors()[0].message, "A tour must have a name");
    }

    #[test]
    fn test_unknown_difficulty() {
        let mut input = valid_input();
        input.difficulty = Some("extreme".into());

        let err = validate(&input).unwrap_err();
        assert_eq!(err.errors()[0].message, "Difficulty is either easy, medium or difficult");
    }

    #[test]
    fn test_discount_is_cross_field() {
        let err = validate(&valid_input().with_price_discount(397.0)).unwrap_err();

        assert!(err.only_cross_field());
        assert_eq!(
            err.errors()[0].message,
            "Discount price (397) should be below the regular price"
        );

        assert!(validate(&valid_input().with_price_discount(396.0)).is_ok());
    }

    #[test]
    fn test_discount_listed_with_other_errors() {
        let mut input = valid_input().with_price_discount(500.0);
        input.name = Some("Short".into());

        let err = validate(&input).unwrap_err();

        assert!(!err.only_cross_field());
        assert!(err.has("name"));
        assert!(err.has("priceDiscount"));
    }

    #[test]
    fn test_rating_out_of_range() {
        let err = validate(&valid_input().with_ratings(5.2, 3)).unwrap_err();
        assert_eq!(err.errors()[0].message, "Rating must be below 5.0");

        let err = validate(&valid_input().with_ratings(0.5, 3)).unwrap_err();
        assert_eq!(err.errors()[0].message, "Rating must be above 1.0");

        // rounds into range
        let tour = validate(&valid_input().with_ratings(5.04, 3)).unwrap();
        assert_eq!(tour.ratings_average, 5.0);
    }

    #[test]
    fn test_coordinates_range() {
        let input = valid_input()
            .with_start_location(GeoPoint::new(-200.0, 10.0))
            .with_locations(vec![Location::new(GeoPoint::new(10.0, 95.0), 1)]);

        let err = validate(&input).unwrap_err();

        assert!(err.has("startLocation.coordinates"));
        assert!(err.has("locations.0.coordinates"));
    }

    #[test]
    fn test_patch_only_checks_supplied_fields() {
        let input = UpdateTourInput {
            price: Some(100.0),
            ..Default::default()
        };
        assert!(validate_tour_patch(&input, None).is_ok());

        let input = UpdateTourInput {
            name: Some("Short".into()),
            ..Default::default()
        };
        let err = validate_tour_patch(&input, None).unwrap_err();
        assert!(err.has("name"));
    }

    #[test]
    fn test_patch_normalises_values() {
        let input = UpdateTourInput {
            name: Some("  The Sea Explorer ".into()),
            ratings_average: Some(4.66666),
            ..Default::default()
        };
        let patch = validate_tour_patch(&input, None).unwrap();

        assert_eq!(patch.name.as_deref(), Some("The Sea Explorer"));
        assert_eq!(patch.ratings_average, Some(4.7));
    }

    #[test]
    fn test_patch_discount_checked_against_current() {
        let current = json!({ "price": 397.0, "priceDiscount": 50.0 });
        let input = UpdateTourInput {
            price: Some(40.0),
            ..Default::default()
        };

        assert!(validate_tour_patch(&input, None).is_ok());
        let err = validate_tour_patch(&input, Some(&current)).unwrap_err();
        assert!(err.only_cross_field());
    }

    proptest! {
        #[test]
        fn prop_rejects_name_length_outside_bounds(len in prop_oneof![1usize..10, 41usize..80]) {
            let mut input = valid_input();
            input.name = Some("a".repeat(len));

            let err = validate(&input).unwrap_err();
            prop_assert!(err.has("name"));
        }

        #[test]
        fn prop_accepts_name_length_within_bounds(len in 10usize..=40) {
            let mut input = valid_input();
            input.name = Some("a".repeat(len));

            prop_assert!(validate(&input).is_ok());
        }

        #[test]
        fn prop_rating_is_rounded_and_bounded(rating in 0.0f64..6.0) {
            match validate(&valid_input().with_ratings(rating, 1)) {
                Ok(tour) => {
                    prop_assert_eq!(tour.ratings_average, round_rating(rating));
                    prop_assert!((RATING_MIN..=RATING_MAX).contains(&tour.ratings_average));
                }
                Err(err) => {
                    prop_assert!(err.has("ratingsAverage"));
                    let rounded = round_rating(rating);
                    prop_assert!(!(RATING_MIN..=RATING_MAX).contains(&rounded));
                }
            }
        }

        #[test]
        fn prop_discount_rule(price in 1.0f64..5000.0, discount in 0.0f64..5000.0) {
            let result = validate(&valid_input_with_price(price).with_price_discount(discount));
            if discount < price {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(result.unwrap_err().only_cross_field());
            }
        }
    }

    fn valid_input_with_price(price: f64) -> CreateTourInput {
        let mut input = valid_input();
        input.price = Some(price);
        input
    }
}
