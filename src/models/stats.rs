//! Aggregation result shapes
//!
//! These mirror the documents produced by the statistics, monthly-plan and
//! distance pipelines so results can be handed out typed.

use serde::{Deserialize, Serialize};

/// One difficulty tier of the statistics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStats {
    /// Uppercased difficulty
    #[serde(rename = "_id")]
    pub difficulty: String,
    pub num_tours: u64,
    pub num_ratings: u64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Tour starts within one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    /// 1 to 12
    pub month: u32,
    pub num_tour_starts: u64,
    /// Names of the starting tours
    pub tours: Vec<String>,
}

/// Distance from a reference point to a tour's start location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourDistance {
    pub id: String,
    pub name: String,
    /// In the requested unit
    pub distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tour_stats_reads_group_document() {
        let stats: TourStats = serde_json::from_value(json!({
            "_id": "EASY",
            "numTours": 2,
            "numRatings": 40,
            "avgRating": 4.7,
            "avgPrice": 450.0,
            "minPrice": 397,
            "maxPrice": 503
        }))
        .unwrap();

        assert_eq!(stats.difficulty, "EASY");
        assert_eq!(stats.num_tours, 2);
        assert_eq!(stats.min_price, 397.0);
    }

    #[test]
    fn test_monthly_plan_camel_case() {
        let plan = MonthlyPlan {
            month: 3,
            num_tour_starts: 2,
            tours: vec!["A".into(), "B".into()],
        };
        let value = serde_json::to_value(&plan).unwrap();

        assert_eq!(value["numTourStarts"], 2);
        assert!(value.get("_id").is_none());
    }
}
