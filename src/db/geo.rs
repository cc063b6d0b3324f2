//! Spherical geometry on `[lng, lat]` pairs

use serde_json::Value;

/// Earth radius used for spherical distance queries, in meters
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Great-circle angle between two points, in radians
pub fn angular_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lng1, lat1) = (a[0].to_radians(), a[1].to_radians());
    let (lng2, lat2) = (b[0].to_radians(), b[1].to_radians());

    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Great-circle distance between two points, in meters
pub fn distance_meters(a: [f64; 2], b: [f64; 2]) -> f64 {
    angular_distance(a, b) * EARTH_RADIUS_METERS
}

/// Read `[lng, lat]` from a GeoJSON point object or a bare coordinate array
pub fn point_coordinates(value: &Value) -> Option<[f64; 2]> {
    let coordinates = match value {
        Value::Object(map) => map.get("coordinates")?,
        Value::Array(_) => value,
        _ => return None,
    };

    match coordinates.as_array()?.as_slice() {
        [lng, lat] => Some([lng.as_f64()?, lat.as_f64()?]),
        _ => None,
    }
}
