// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    BoundingBox, Coordinate, CoordinateError, Entity, LocationSource, Place, RankedEntity, ReferenceLocation,
};
pub use requests::{ClickRequest, GeolocationFailure, GeolocationReport, PlaceQuery, RadiusRequest, SetLocationRequest};
pub use responses::{ErrorResponse, GeolocationResponse, HealthResponse, LocationResponse, PlacesResponse};
