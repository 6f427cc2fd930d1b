//! Creator Map - map and distance search for the creator discovery app
//!
//! This library keeps the visitor's reference location, resolves place
//! names, filters creators by great-circle distance and drives the map and
//! result list from the remote creator search.
//!
//! One instance serves one visitor: the saved location, the map and the
//! filters are shared by every request, so the server binds to the loopback
//! interface by default.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{distance::{distance_km, filter_by_radius, haversine_distance}, MapView, SearchController};
pub use models::{Coordinate, Entity, LocationSource, Place, RankedEntity, ReferenceLocation};
pub use services::{LocationStore, PlaceSearch};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let paris = Coordinate::default_location();
        assert_eq!(distance_km(&paris, &paris), 0.0);
    }
}
