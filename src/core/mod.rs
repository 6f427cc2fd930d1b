// Core exports
pub mod controller;
pub mod distance;
pub mod filters;
pub mod map_view;
pub mod results;

pub use controller::{ErrorPanel, SearchController, SearchOutcome, SearchSnapshot};
pub use distance::{distance_km, filter_by_radius, format_distance, haversine_distance, DistanceStats};
pub use filters::{ActiveFilter, SearchFilters, UrlState};
pub use map_view::{ClusterOptions, MapConfig, MapState, MapView};
pub use results::{ListEntry, Pagination, Stars};
