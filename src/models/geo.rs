//! Geospatial value types
//!
//! Coordinates follow GeoJSON ordering: `[lng, lat]`. Request parameters use
//! the human ordering `"lat,lng"`, which `LatLng` parses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// GeoJSON geometry tag. Only points are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    #[default]
    Point,
}

/// A GeoJSON point with optional descriptive text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Always `"Point"`
    #[serde(rename = "type", default)]
    pub kind: PointKind,
    /// `[lng, lat]`
    pub coordinates: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GeoPoint {
    /// Create a bare point from longitude and latitude
    pub fn new(lng: f64, lat: f64) -> Self {
        Self {
            kind: PointKind::Point,
            coordinates: [lng, lat],
            address: None,
            description: None,
        }
    }

    /// Set the address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A tour waypoint: a point plus the day of the tour it is visited on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(flatten)]
    pub point: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl Location {
    pub fn new(point: GeoPoint, day: u32) -> Self {
        Self {
            point,
            day: Some(day),
        }
    }
}

/// Error raised when geo request parameters are malformed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoParamError {
    #[error("Please provide latitude and longitude in the format lat,lng.")]
    MalformedLatLng,

    #[error("Unit must be either 'mi' or 'km', got '{0}'")]
    UnknownUnit(String),
}

/// Distance unit accepted by the geo queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceUnit {
    #[serde(rename = "mi")]
    Miles,
    #[serde(rename = "km")]
    Kilometers,
}

impl DistanceUnit {
    /// Earth's radius expressed in this unit
    pub fn earth_radius(&self) -> f64 {
        match self {
            DistanceUnit::Miles => 3963.2,
            DistanceUnit::Kilometers => 6378.1,
        }
    }

    /// Factor converting meters into this unit
    pub fn meters_multiplier(&self) -> f64 {
        match self {
            DistanceUnit::Miles => 0.000621371,
            DistanceUnit::Kilometers => 0.001,
        }
    }

    /// Convert a distance in this unit to an angle in radians on the sphere
    pub fn to_radians(&self, distance: f64) -> f64 {
        distance / self.earth_radius()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceUnit::Miles => "mi",
            DistanceUnit::Kilometers => "km",
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = GeoParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mi" => Ok(DistanceUnit::Miles),
            "km" => Ok(DistanceUnit::Kilometers),
            other => Err(GeoParamError::UnknownUnit(other.to_string())),
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `"lat,lng"` request parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// GeoJSON ordered coordinates
    pub fn coordinates(&self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

impl FromStr for LatLng {
    type Err = GeoParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(str::trim);
        let lat = parts.next().filter(|p| !p.is_empty());
        let lng = parts.next().filter(|p| !p.is_empty());

        let (lat, lng) = match (lat, lng, parts.next()) {
            (Some(lat), Some(lng), None) => (lat, lng),
            _ => return Err(GeoParamError::MalformedLatLng),
        };

        let lat: f64 = lat.parse().map_err(|_| GeoParamError::MalformedLatLng)?;
        let lng: f64 = lng.parse().map_err(|_| GeoParamError::MalformedLatLng)?;

        if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
            return Err(GeoParamError::MalformedLatLng);
        }

        Ok(Self { lat, lng })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latlng() {
        let point: LatLng = "34.1,-118.5".parse().unwrap();
        assert_eq!(point.lat, 34.1);
        assert_eq!(point.lng, -118.5);
        assert_eq!(point.coordinates(), [-118.5, 34.1]);
    }

    #[test]
    fn test_parse_latlng_with_spaces() {
        let point: LatLng = "34.305562, -118.535168".parse().unwrap();
        assert_eq!(point.lng, -118.535168);
    }

    #[test]
    fn test_parse_latlng_missing_component() {
        assert_eq!("34.1".parse::<LatLng>(), Err(GeoParamError::MalformedLatLng));
        assert_eq!("34.1,".parse::<LatLng>(), Err(GeoParamError::MalformedLatLng));
        assert_eq!(",-118".parse::<LatLng>(), Err(GeoParamError::MalformedLatLng));
        assert_eq!("".parse::<LatLng>(), Err(GeoParamError::MalformedLatLng));
    }

    #[test]
    fn test_parse_latlng_malformed() {
        assert!("north,west".parse::<LatLng>().is_err());
        assert!("1,2,3".parse::<LatLng>().is_err());
        assert!("95,10".parse::<LatLng>().is_err());
    }

    #[test]
    fn test_distance_unit_parse() {
        assert_eq!("mi".parse::<DistanceUnit>(), Ok(DistanceUnit::Miles));
        assert_eq!("km".parse::<DistanceUnit>(), Ok(DistanceUnit::Kilometers));
        assert!(matches!(
            "yd".parse::<DistanceUnit>(),
            Err(GeoParamError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_distance_unit_radians() {
        assert_eq!(DistanceUnit::Miles.to_radians(200.0), 200.0 / 3963.2);
        assert_eq!(DistanceUnit::Kilometers.to_radians(200.0), 200.0 / 6378.1);
    }

    #[test]
    fn test_geo_point_serializes_as_geojson() {
        let point = GeoPoint::new(-80.185942, 25.774772).with_address("Miami, USA");
        let value = serde_json::to_value(&point).unwrap();

        assert_eq!(value["type"], "Point");
        assert_eq!(value["coordinates"][0], -80.185942);
        assert_eq!(value["address"], "Miami, USA");
        assert!(value.get("description").is_none());
    }

    #[test]
    fn test_location_flattens_point() {
        let location = Location::new(GeoPoint::new(-80.1, 25.7).with_description("Beach"), 2);
        let value = serde_json::to_value(&location).unwrap();

        assert_eq!(value["type"], "Point");
        assert_eq!(value["day"], 2);
        assert_eq!(value["description"], "Beach");

        let back: Location = serde_json::from_value(value).unwrap();
        assert_eq!(back, location);
    }
}
