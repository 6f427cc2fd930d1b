use crate::models::{Coordinate, CoordinateError, LocationSource, ReferenceLocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Key under which the reference location is persisted
pub const STORAGE_KEY: &str = "user_map_location";

/// Errors from a persistence backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Categorized geolocation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeolocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Timed out waiting for a position")]
    Timeout,

    #[error("Geolocation is not supported")]
    Unsupported,
}

impl GeolocationError {
    /// Map a platform error code (1, 2, 3) to a category
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::PermissionDenied,
            2 => Self::PositionUnavailable,
            3 => Self::Timeout,
            _ => Self::Unsupported,
        }
    }
}

/// Options forwarded to the position provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub max_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            max_age: Duration::from_secs(600),
        }
    }
}

/// A raw position as reported by the platform, not yet validated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// Source of device positions
pub trait PositionProvider: Send + Sync {
    fn current_position(
        &self,
        options: &PositionOptions,
    ) -> impl Future<Output = Result<Position, GeolocationError>> + Send;
}

/// A position (or failure code) already obtained by the browser and reported
/// to the service
#[derive(Debug, Clone, Copy)]
pub struct ReportedPosition(pub Result<Position, GeolocationError>);

impl PositionProvider for ReportedPosition {
    async fn current_position(&self, _options: &PositionOptions) -> Result<Position, GeolocationError> {
        self.0
    }
}

/// String key/value persistence, modeled on browser local storage
pub trait LocationStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file holding a flat key/value object
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl LocationStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("file storage lock poisoned".into()))?;

        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Persisted form; older values only carry latitude/longitude
#[derive(Debug, Serialize, Deserialize)]
struct StoredLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    source: Option<LocationSource>,
    #[serde(rename = "updatedAt", default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Holds and persists the visitor's reference location
///
/// The store never notifies anyone: whoever calls [`LocationStore::save`] is
/// responsible for refreshing dependent views.
pub struct LocationStore {
    storage: Box<dyn LocationStorage>,
    key: String,
    default_location: Coordinate,
}

impl LocationStore {
    pub fn new(storage: Box<dyn LocationStorage>) -> Self {
        Self {
            storage,
            key: STORAGE_KEY.to_string(),
            default_location: Coordinate::default_location(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_default_location(mut self, coordinate: Coordinate) -> Self {
        self.default_location = coordinate;
        self
    }

    /// The persisted location, or the default when nothing usable is stored
    pub fn current_location(&self) -> ReferenceLocation {
        match self.load() {
            Ok(Some(location)) => location,
            Ok(None) => {
                tracing::debug!("No saved location under '{}', using default", self.key);
                self.fallback()
            }
            Err(e) => {
                tracing::warn!("Failed to read saved location, using default: {}", e);
                self.fallback()
            }
        }
    }

    /// Validate and persist a coordinate, replacing any previous value
    ///
    /// Out-of-range input is rejected before storage is touched.
    pub fn save(
        &self,
        latitude: f64,
        longitude: f64,
        source: LocationSource,
    ) -> Result<ReferenceLocation, LocationUpdateError> {
        let coordinate = Coordinate::new(latitude, longitude)?;
        self.save_coordinate(coordinate, source)
    }

    pub fn save_coordinate(
        &self,
        coordinate: Coordinate,
        source: LocationSource,
    ) -> Result<ReferenceLocation, LocationUpdateError> {
        let location = ReferenceLocation::new(coordinate, source);
        let stored = StoredLocation {
            latitude: coordinate.latitude(),
            longitude: coordinate.longitude(),
            source: Some(source),
            updated_at: Some(location.updated_at),
        };

        let json = serde_json::to_string(&stored).map_err(StorageError::from)?;
        self.storage.set(&self.key, &json)?;

        tracing::debug!(
            "Saved reference location ({:.6}, {:.6}) from {:?}",
            coordinate.latitude(),
            coordinate.longitude(),
            source
        );

        Ok(location)
    }

    /// Ask a position provider for the device location
    ///
    /// Success is validated and persisted. Failures are returned categorized
    /// and leave the stored value untouched; the provider is also bounded by
    /// `options.timeout` here.
    pub async fn request_browser_location<P: PositionProvider>(
        &self,
        provider: &P,
        options: PositionOptions,
    ) -> Result<ReferenceLocation, GeolocationError> {
        let started = std::time::Instant::now();

        let position = tokio::time::timeout(options.timeout, provider.current_position(&options))
            .await
            .map_err(|_| GeolocationError::Timeout)??;

        tracing::debug!(
            "Position obtained in {}ms (accuracy: {:?})",
            started.elapsed().as_millis(),
            position.accuracy
        );

        match self.save(position.latitude, position.longitude, LocationSource::BrowserGeolocation) {
            Ok(location) => Ok(location),
            Err(LocationUpdateError::Invalid(e)) => {
                tracing::warn!("Provider returned an invalid position: {}", e);
                Err(GeolocationError::PositionUnavailable)
            }
            Err(LocationUpdateError::Storage(e)) => {
                // The position itself is fine; only persistence failed
                tracing::warn!("Failed to persist browser location: {}", e);
                Ok(ReferenceLocation::new(
                    Coordinate::new(position.latitude, position.longitude)
                        .map_err(|_| GeolocationError::PositionUnavailable)?,
                    LocationSource::BrowserGeolocation,
                ))
            }
        }
    }

    fn load(&self) -> Result<Option<ReferenceLocation>, StorageError> {
        let Some(raw) = self.storage.get(&self.key)? else {
            return Ok(None);
        };

        let stored: StoredLocation = serde_json::from_str(&raw)?;
        match Coordinate::new(stored.latitude, stored.longitude) {
            Ok(coordinate) => Ok(Some(ReferenceLocation {
                coordinate,
                source: stored.source.unwrap_or(LocationSource::ManualClick),
                updated_at: stored.updated_at.unwrap_or_else(Utc::now),
            })),
            Err(e) => {
                tracing::warn!("Ignoring stored location: {}", e);
                Ok(None)
            }
        }
    }

    fn fallback(&self) -> ReferenceLocation {
        ReferenceLocation::new(self.default_location, LocationSource::DefaultFallback)
    }
}

/// Why a location update was refused
#[derive(Debug, Error)]
pub enum LocationUpdateError {
    #[error(transparent)]
    Invalid(#[from] CoordinateError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    impl PositionProvider for SlowProvider {
        async fn current_position(&self, _options: &PositionOptions) -> Result<Position, GeolocationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Position { latitude: 0.0, longitude: 0.0, accuracy: None })
        }
    }

    #[test]
    fn test_default_before_save() {
        let store = LocationStore::in_memory();
        let location = store.current_location();
        assert_eq!(location.coordinate, Coordinate::default_location());
        assert_eq!(location.source, LocationSource::DefaultFallback);
    }

    #[test]
    fn test_save_roundtrip() {
        let store = LocationStore::in_memory();
        store.save(45.7578, 4.8320, LocationSource::SearchedPlace).unwrap();

        let location = store.current_location();
        assert_eq!(location.coordinate.latitude(), 45.7578);
        assert_eq!(location.coordinate.longitude(), 4.8320);
        assert_eq!(location.source, LocationSource::SearchedPlace);
    }

    #[test]
    fn test_invalid_save_keeps_previous() {
        let store = LocationStore::in_memory();
        store.save(45.7578, 4.8320, LocationSource::ManualClick).unwrap();

        let err = store.save(95.0, 0.0, LocationSource::ManualClick);
        assert!(matches!(err, Err(LocationUpdateError::Invalid(_))));
        assert_eq!(store.current_location().coordinate.latitude(), 45.7578);
    }

    #[test]
    fn test_legacy_value_is_readable() {
        let storage = MemoryStorage::new();
        storage.set(STORAGE_KEY, r#"{"latitude": 43.2965, "longitude": 5.3698}"#).unwrap();
        let store = LocationStore::new(Box::new(storage));

        let location = store.current_location();
        assert_eq!(location.coordinate.latitude(), 43.2965);
    }

    #[test]
    fn test_corrupt_value_falls_back() {
        let storage = MemoryStorage::new();
        storage.set(STORAGE_KEY, "not json").unwrap();
        let store = LocationStore::new(Box::new(storage));

        assert_eq!(store.current_location().source, LocationSource::DefaultFallback);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GeolocationError::from_code(1), GeolocationError::PermissionDenied);
        assert_eq!(GeolocationError::from_code(2), GeolocationError::PositionUnavailable);
        assert_eq!(GeolocationError::from_code(3), GeolocationError::Timeout);
        assert_eq!(GeolocationError::from_code(0), GeolocationError::Unsupported);
    }

    #[tokio::test]
    async fn test_browser_location_success_persists() {
        let store = LocationStore::in_memory();
        let provider = ReportedPosition(Ok(Position { latitude: 50.6292, longitude: 3.0573, accuracy: Some(12.0) }));

        let location = store
            .request_browser_location(&provider, PositionOptions::default())
            .await
            .unwrap();

        assert_eq!(location.source, LocationSource::BrowserGeolocation);
        assert_eq!(store.current_location().coordinate.latitude(), 50.6292);
    }

    #[tokio::test]
    async fn test_browser_location_error_does_not_persist() {
        let store = LocationStore::in_memory();
        let provider = ReportedPosition(Err(GeolocationError::PermissionDenied));

        let result = store.request_browser_location(&provider, PositionOptions::default()).await;
        assert_eq!(result, Err(GeolocationError::PermissionDenied));
        assert_eq!(store.current_location().source, LocationSource::DefaultFallback);
    }

    #[tokio::test]
    async fn test_browser_location_times_out() {
        let store = LocationStore::in_memory();
        let options = PositionOptions { timeout: Duration::from_millis(100), ..PositionOptions::default() };

        let result = store.request_browser_location(&SlowProvider, options).await;
        assert_eq!(result, Err(GeolocationError::Timeout));
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let path = std::env::temp_dir().join(format!("creator-map-{}.json", uuid::Uuid::new_v4()));
        let store = LocationStore::new(Box::new(FileStorage::new(&path)));
        store.save(47.2184, -1.5536, LocationSource::ManualClick).unwrap();

        let reopened = LocationStore::new(Box::new(FileStorage::new(&path)));
        assert_eq!(reopened.current_location().coordinate.longitude(), -1.5536);

        std::fs::remove_file(&path).ok();
    }
}
