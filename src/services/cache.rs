use crate::models::Place;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// In-memory cache for geocoder answers
///
/// Only successful network answers are stored; the common-city table and
/// failed lookups never reach it.
pub struct GeocodeCache {
    places: moka::future::Cache<String, Vec<Place>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GeocodeCache {
    /// Create a new cache
    pub fn new(max_entries: u64, ttl_secs: u64) -> Self {
        let places = moka::future::CacheBuilder::new(max_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            places,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a normalized query
    pub async fn get(&self, key: &str) -> Option<Vec<Place>> {
        match self.places.get(key).await {
            Some(places) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Geocode cache hit: {}", key);
                Some(places)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Geocode cache miss: {}", key);
                None
            }
        }
    }

    pub async fn insert(&self, key: String, places: Vec<Place>) {
        self.places.insert(key, places).await;
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            entries: self.places.entry_count(),
            hit_count: hits,
            miss_count: misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a cache key for a geocoder query
    pub fn place_query(query: &str, country_codes: Option<&str>) -> String {
        let normalized = query.trim().to_lowercase();
        match country_codes {
            Some(cc) => format!("place:{}:{}", cc, normalized),
            None => format!("place:{}", normalized),
        }
    }
}
