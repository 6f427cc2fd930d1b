// Service exports
pub mod cache;
pub mod geocoder;
pub mod location;
pub mod search_api;

pub use cache::{CacheKey, CacheStats, GeocodeCache};
pub use geocoder::{CityTable, GeocodeError, PlaceSearch, PlaceSearchOptions};
pub use location::{
    FileStorage, GeolocationError, LocationStorage, LocationStore, LocationUpdateError, MemoryStorage, Position,
    PositionOptions, PositionProvider, ReportedPosition, StorageError,
};
pub use search_api::{CreatorSearch, CreatorSearchClient, MapQuery, SearchError, SearchPage};
