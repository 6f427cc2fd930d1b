use serde::Serialize;

use crate::models::{BoundingBox, Coordinate, Entity, RankedEntity};

/// Earth's radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Calculate the Haversine distance between two coordinates in kilometers
///
/// Both inputs are validated [`Coordinate`]s, so the result is always a
/// finite value `>= 0`.
#[inline]
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine_distance(a.latitude(), a.longitude(), b.latitude(), b.longitude())
}

/// Calculate the Haversine distance between two points in kilometers
///
/// # Arguments
/// * `lat1` - Latitude of first point in degrees
/// * `lon1` - Longitude of first point in degrees
/// * `lat2` - Latitude of second point in degrees
/// * `lon2` - Longitude of second point in degrees
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Whether a radius value actually restricts anything
///
/// Zero, negative and non-finite radii all mean "no filtering".
#[inline]
pub fn is_filtering_radius(radius_km: f64) -> bool {
    radius_km.is_finite() && radius_km > 0.0
}

/// Keep the entities within `radius_km` of `reference`
///
/// Every retained entity is annotated with its distance. The filter is
/// stable: retained entities keep their input order. A radius `<= 0` keeps
/// everything (still annotated).
pub fn filter_by_radius(
    reference: &Coordinate,
    entities: impl IntoIterator<Item = Entity>,
    radius_km: f64,
) -> Vec<RankedEntity> {
    let restrict = is_filtering_radius(radius_km);

    entities
        .into_iter()
        .filter_map(|entity| {
            let distance = distance_km(reference, &entity.coordinate);
            if restrict && distance > radius_km {
                None
            } else {
                Some(RankedEntity::new(entity, distance))
            }
        })
        .collect()
}

/// Sort ranked entities by ascending distance, keeping input order on ties
pub fn sort_by_distance(entities: &mut [RankedEntity]) {
    entities.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Human readable distance label
///
/// Below 1 km the value is shown in metres, below 10 km with one decimal,
/// above that in whole kilometres.
pub fn format_distance(distance_km: f64) -> String {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return "unknown distance".to_string();
    }

    // Units are picked on the rounded value so 999.6 m reads "1.0 km"
    let metres = (distance_km * 1000.0).round();
    let tenths = (distance_km * 10.0).round() / 10.0;

    if metres < 1000.0 {
        format!("{} m", metres as u64)
    } else if tenths < 10.0 {
        format!("{:.1} km", tenths)
    } else {
        format!("{} km", distance_km.round() as u64)
    }
}

/// Distance summary of a result set, bucketed the way the map legend shows it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistanceStats {
    pub count: usize,
    pub min_km: Option<f64>,
    pub max_km: Option<f64>,
    pub mean_km: Option<f64>,
    pub distribution: DistanceDistribution,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistanceDistribution {
    #[serde(rename = "0-5km")]
    pub up_to_5: usize,
    #[serde(rename = "5-10km")]
    pub up_to_10: usize,
    #[serde(rename = "10-25km")]
    pub up_to_25: usize,
    #[serde(rename = "25-50km")]
    pub up_to_50: usize,
    #[serde(rename = "50km+")]
    pub beyond_50: usize,
}

impl DistanceStats {
    pub fn from_distances(distances: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        let mut sum = 0.0;

        for d in distances {
            stats.count += 1;
            sum += d;
            stats.min_km = Some(stats.min_km.map_or(d, |m| m.min(d)));
            stats.max_km = Some(stats.max_km.map_or(d, |m| m.max(d)));

            let bucket = &mut stats.distribution;
            if d <= 5.0 {
                bucket.up_to_5 += 1;
            } else if d <= 10.0 {
                bucket.up_to_10 += 1;
            } else if d <= 25.0 {
                bucket.up_to_25 += 1;
            } else if d <= 50.0 {
                bucket.up_to_50 += 1;
            } else {
                bucket.beyond_50 += 1;
            }
        }

        if stats.count > 0 {
            stats.mean_km = Some(sum / stats.count as f64);
        }

        stats
    }
}

/// Calculate a bounding box around a center point
///
/// Cheaper than Haversine for pre-filtering.
/// 1° latitude ≈ 111km, 1° longitude ≈ 111km * cos(latitude)
pub fn calculate_bounding_box(center: &Coordinate, radius_km: f64) -> BoundingBox {
    let lat = center.latitude();
    let lon = center.longitude();

    let lat_delta = radius_km / 111.0;
    // Near the poles cos() goes to zero; cap at a full turn
    let lon_delta = (radius_km / (111.0 * lat.to_radians().cos().abs())).min(360.0);

    BoundingBox {
        min_lat: lat - lat_delta,
        max_lat: lat + lat_delta,
        min_lon: lon - lon_delta,
        max_lon: lon + lon_delta,
    }
}

/// Check if a coordinate is within a bounding box
#[inline]
pub fn is_within_bounding_box(point: &Coordinate, bbox: &BoundingBox) -> bool {
    point.latitude() >= bbox.min_lat
        && point.latitude() <= bbox.max_lat
        && point.longitude() >= bbox.min_lon
        && point.longitude() <= bbox.max_lon
}
