use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::distance::sort_by_distance;
use crate::core::filters::{ActiveFilter, SearchFilters, UrlState};
use crate::core::map_view::{EntityMarker, MapState, MapView};
use crate::core::results::{list_entries, ListEntry, Pagination};
use crate::models::{LocationSource, ReferenceLocation};
use crate::services::location::{LocationStore, LocationUpdateError};
use crate::services::search_api::{CreatorSearch, MapQuery, SearchError};

/// Inline error shown in place of the results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPanel {
    pub message: String,
    pub retryable: bool,
}

impl From<&SearchError> for ErrorPanel {
    fn from(error: &SearchError) -> Self {
        match error {
            SearchError::RequestError(e) if e.is_timeout() => Self {
                message: "The search service took too long to answer.".to_string(),
                retryable: true,
            },
            SearchError::RequestError(_) => Self {
                message: "Unable to reach the search service.".to_string(),
                retryable: true,
            },
            SearchError::Status(status) => Self {
                message: format!("The search failed (HTTP {}).", status),
                // Client errors will fail the same way again, except throttling and timeouts
                retryable: *status >= 500 || *status == 408 || *status == 429,
            },
            SearchError::InvalidResponse(_) => Self {
                message: "The search service returned an unexpected answer.".to_string(),
                retryable: true,
            },
        }
    }
}

/// What happened to a search request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Identical to the last issued query
    Skipped,
    /// A newer debounced request replaced this one before it was sent
    Superseded,
    /// Results applied to the map and list
    Applied { visible: usize, received: usize },
    /// A newer request was issued while this one was in flight
    Stale,
    Failed(ErrorPanel),
}

#[derive(Debug, Default)]
struct ControllerState {
    filters: SearchFilters,
    last_query: Option<MapQuery>,
    last_query_string: Option<String>,
    /// Sequence of the last issued request
    issued: u64,
    /// Sequence of the last request whose results were applied
    applied: u64,
    error: Option<ErrorPanel>,
    total: Option<u64>,
    pagination: Pagination,
}

/// Marks a request as in flight until it finishes or its future is dropped
struct InFlight<'a> {
    slot: &'a AtomicU64,
    sequence: u64,
}

impl<'a> InFlight<'a> {
    fn start(slot: &'a AtomicU64, sequence: u64) -> Self {
        slot.store(sequence, Ordering::SeqCst);
        Self { slot, sequence }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // A newer request may own the slot already
        let _ = self
            .slot
            .compare_exchange(self.sequence, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Everything a client needs to render the page
#[derive(Debug, Clone, Serialize)]
pub struct SearchSnapshot {
    pub map: MapState,
    pub results: Vec<ListEntry>,
    pub filters: SearchFilters,
    pub active_filters: Vec<ActiveFilter>,
    pub url_query: String,
    pub total: Option<u64>,
    pub pagination: Pagination,
    pub error: Option<ErrorPanel>,
    pub loading: bool,
}

/// Ties the reference location, the map and the remote search together
///
/// Lock order is always map, then state. Neither lock is held across the
/// remote call.
pub struct SearchController<C: CreatorSearch> {
    client: C,
    locations: Arc<LocationStore>,
    map: Mutex<MapView>,
    state: Mutex<ControllerState>,
    sequence: AtomicU64,
    in_flight: AtomicU64,
    debounce: AtomicU64,
}

impl<C: CreatorSearch> SearchController<C> {
    pub fn new(client: C, locations: Arc<LocationStore>, map: MapView) -> Self {
        Self {
            client,
            locations,
            map: Mutex::new(map),
            state: Mutex::new(ControllerState::default()),
            sequence: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            debounce: AtomicU64::new(0),
        }
    }

    pub fn locations(&self) -> &LocationStore {
        &self.locations
    }

    /// Current reference point, radius and filters as a canonical query
    pub async fn build_query(&self) -> MapQuery {
        let (center, radius_km) = {
            let map = self.map.lock().await;
            (map.reference(), map.radius_km())
        };
        let filters = self.state.lock().await.filters.clone();

        MapQuery {
            center,
            radius_km,
            filters,
        }
    }

    /// Run a search for the current state
    ///
    /// # Arguments
    /// * `force` - Send the request even if it equals the last issued query
    ///
    /// # Returns
    /// The outcome; failures are also kept as the current error panel
    pub async fn search(&self, force: bool) -> SearchOutcome {
        let query = self.build_query().await;
        self.execute(query, force).await
    }

    /// Re-issue the last query unconditionally
    pub async fn retry(&self) -> SearchOutcome {
        let last = self.state.lock().await.last_query.clone();
        match last {
            Some(query) => {
                tracing::info!("Retrying last creator search");
                self.execute(query, true).await
            }
            None => self.search(true).await,
        }
    }

    /// Search after `delay`, unless another debounced call arrives first
    pub async fn search_debounced(&self, delay: Duration) -> SearchOutcome {
        let generation = self.debounce.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(delay).await;

        if self.debounce.load(Ordering::SeqCst) != generation {
            return SearchOutcome::Superseded;
        }
        self.search(false).await
    }

    /// Validate, persist and apply a new reference location, then search
    ///
    /// Invalid coordinates leave the store, the map and the query untouched.
    pub async fn update_location(
        &self,
        latitude: f64,
        longitude: f64,
        source: LocationSource,
    ) -> Result<SearchOutcome, LocationUpdateError> {
        let location = self.locations.save(latitude, longitude, source)?;
        Ok(self.apply_location(&location).await)
    }

    /// Apply a location that is already validated and persisted
    pub async fn apply_location(&self, location: &ReferenceLocation) -> SearchOutcome {
        self.map
            .lock()
            .await
            .set_reference_location(location.coordinate, None);
        self.search(false).await
    }

    /// A click on the map becomes the new reference location
    pub async fn handle_click(&self, latitude: f64, longitude: f64) -> Result<SearchOutcome, LocationUpdateError> {
        let coordinate = self.map.lock().await.handle_click(latitude, longitude)?;
        let location = self
            .locations
            .save_coordinate(coordinate, LocationSource::ManualClick)?;
        Ok(self.apply_location(&location).await)
    }

    pub async fn set_radius(&self, radius_km: f64) -> SearchOutcome {
        self.map.lock().await.set_radius(radius_km);
        self.search(false).await
    }

    /// Re-filter the map right away but debounce the remote search
    pub async fn set_radius_debounced(&self, radius_km: f64, delay: Duration) -> SearchOutcome {
        self.map.lock().await.set_radius(radius_km);
        self.search_debounced(delay).await
    }

    pub async fn set_filters(&self, filters: SearchFilters) -> SearchOutcome {
        self.state.lock().await.filters = filters;
        self.search(false).await
    }

    /// Drop one active filter (or one value of `domains`) and search again
    pub async fn remove_filter(&self, key: &str, value: Option<&str>) -> SearchOutcome {
        self.state.lock().await.filters.remove(key, value);
        self.search(false).await
    }

    /// Restore state from a page URL and search once
    ///
    /// A location in the URL moves the map but is not persisted, so shared
    /// links never overwrite the visitor's saved location.
    pub async fn apply_url(&self, query_string: &str) -> SearchOutcome {
        let url = UrlState::from_query_string(query_string);

        {
            let mut map = self.map.lock().await;
            if let Some(location) = url.location {
                map.set_reference_location(location, None);
            }
            if let Some(radius) = url.radius_km {
                map.set_radius(radius);
            }
        }
        self.state.lock().await.filters = url.filters;

        self.search(false).await
    }

    /// Query string reflecting the current state
    pub async fn url_query(&self) -> String {
        let query = self.build_query().await;
        UrlState {
            location: Some(query.center),
            radius_km: Some(query.radius_km),
            filters: query.filters,
        }
        .to_query_string()
    }

    /// Open an entity from the list on the map
    pub async fn focus_entity(&self, entity_id: &str) -> Option<EntityMarker> {
        self.map.lock().await.focus_entity(entity_id).cloned()
    }

    pub async fn snapshot(&self) -> SearchSnapshot {
        let map = self.map.lock().await;
        let state = self.state.lock().await;

        let url_query = UrlState {
            location: Some(map.reference()),
            radius_km: Some(map.radius_km()),
            filters: state.filters.clone(),
        }
        .to_query_string();

        // The list shows the nearest creators first; the map keeps dataset order
        let mut nearest = map.visible().to_vec();
        sort_by_distance(&mut nearest);

        SearchSnapshot {
            map: map.snapshot(),
            results: list_entries(&nearest),
            filters: state.filters.clone(),
            active_filters: state.filters.active(),
            url_query,
            total: state.total,
            pagination: state.pagination,
            error: state.error.clone(),
            loading: self.in_flight.load(Ordering::SeqCst) != 0,
        }
    }

    async fn execute(&self, query: MapQuery, force: bool) -> SearchOutcome {
        let query_string = query.to_query_string();

        let (sequence, _in_flight) = {
            let mut state = self.state.lock().await;
            // Only a query that is still pending or whose results are shown
            // counts as already issued; failed or abandoned ones go out again
            let current = state.applied == state.issued
                || self.in_flight.load(Ordering::SeqCst) == state.issued;
            if !force && current && state.last_query_string.as_deref() == Some(query_string.as_str()) {
                tracing::debug!("Search unchanged, skipping request");
                return SearchOutcome::Skipped;
            }
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            state.last_query_string = Some(query_string);
            state.last_query = Some(query.clone());
            state.issued = sequence;
            (sequence, InFlight::start(&self.in_flight, sequence))
        };

        let started = std::time::Instant::now();
        let result = self.client.search(&query).await;

        let mut map = self.map.lock().await;
        let mut state = self.state.lock().await;

        if self.sequence.load(Ordering::SeqCst) != sequence {
            tracing::debug!("Discarding stale search response #{}", sequence);
            return SearchOutcome::Stale;
        }

        match result {
            Ok(page) => {
                let received = page.entities.len();
                let visible = map.render_entities(page.entities).len();

                state.applied = sequence;
                state.error = None;
                state.total = page.total;
                state.pagination = Pagination::from_meta(page.meta.as_ref(), query.filters.page, page.total);

                tracing::info!(
                    "Search #{} returned {} creators ({} within radius) in {}ms",
                    sequence,
                    received,
                    visible,
                    started.elapsed().as_millis()
                );

                SearchOutcome::Applied { visible, received }
            }
            Err(e) => {
                tracing::error!("Creator search #{} failed: {}", sequence, e);
                let panel = ErrorPanel::from(&e);
                state.error = Some(panel.clone());
                state.last_query_string = None;
                SearchOutcome::Failed(panel)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::map_view::MapConfig;
    use crate::models::{Coordinate, Entity};
    use crate::services::search_api::SearchPage;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Answers from a script and records every query it receives
    #[derive(Default)]
    struct ScriptedSearch {
        answers: StdMutex<VecDeque<Result<SearchPage, SearchError>>>,
        seen: StdMutex<Vec<String>>,
    }

    impl ScriptedSearch {
        fn answering(answers: Vec<Result<SearchPage, SearchError>>) -> Self {
            Self {
                answers: StdMutex::new(answers.into()),
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl CreatorSearch for ScriptedSearch {
        async fn search(&self, query: &MapQuery) -> Result<SearchPage, SearchError> {
            self.seen.lock().unwrap().push(query.to_query_string());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(page(vec![])))
        }
    }

    fn page(entities: Vec<Entity>) -> SearchPage {
        SearchPage {
            total: Some(entities.len() as u64),
            entities,
            meta: None,
            skipped: 0,
        }
    }

    fn creator(id: &str, lat: f64, lon: f64) -> Entity {
        Entity {
            id: id.to_string(),
            coordinate: Coordinate::new(lat, lon).unwrap(),
            display_name: id.to_string(),
            rating: Some(4.0),
            thumbnail_url: None,
            domains: vec![],
            url: format!("/creators/creator/{}/", id),
        }
    }

    fn controller(client: ScriptedSearch) -> SearchController<ScriptedSearch> {
        let locations = Arc::new(LocationStore::in_memory());
        let map = MapView::initialize(
            MapConfig {
                jitter_seed: Some(1),
                ..MapConfig::default()
            },
            &locations.current_location(),
        );
        SearchController::new(client, locations, map)
    }

    #[tokio::test]
    async fn test_identical_query_skipped() {
        let ctrl = controller(ScriptedSearch::default());

        assert!(matches!(ctrl.search(false).await, SearchOutcome::Applied { .. }));
        assert_eq!(ctrl.search(false).await, SearchOutcome::Skipped);
        assert!(matches!(ctrl.search(true).await, SearchOutcome::Applied { .. }));
        assert_eq!(ctrl.client.calls(), 2);
    }

    #[tokio::test]
    async fn test_results_applied_to_map_and_list() {
        let ctrl = controller(ScriptedSearch::answering(vec![Ok(page(vec![
            creator("near", 48.86, 2.35),
            creator("far", 43.2965, 5.3698),
        ]))]));

        let outcome = ctrl.search(false).await;
        assert_eq!(outcome, SearchOutcome::Applied { visible: 1, received: 2 });

        let snapshot = ctrl.snapshot().await;
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].id, "near");
        assert_eq!(snapshot.map.markers.len(), 1);
        assert!(snapshot.error.is_none());
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_failure_shows_panel_then_retry_clears_it() {
        let ctrl = controller(ScriptedSearch::answering(vec![
            Err(SearchError::Status(503)),
            Ok(page(vec![creator("a", 48.86, 2.35)])),
        ]));

        match ctrl.search(false).await {
            SearchOutcome::Failed(panel) => assert!(panel.retryable),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(ctrl.snapshot().await.error.is_some());

        assert!(matches!(ctrl.retry().await, SearchOutcome::Applied { visible: 1, .. }));
        assert!(ctrl.snapshot().await.error.is_none());
        assert_eq!(ctrl.client.calls(), 2);
    }

    #[tokio::test]
    async fn test_reload_after_failure_searches_again() {
        let ctrl = controller(ScriptedSearch::answering(vec![
            Err(SearchError::Status(503)),
            Ok(page(vec![creator("a", 48.86, 2.35)])),
        ]));

        let url = "lat=48.8566&lng=2.3522&radius=50";
        assert!(matches!(ctrl.apply_url(url).await, SearchOutcome::Failed(_)));

        assert!(matches!(ctrl.apply_url(url).await, SearchOutcome::Applied { visible: 1, .. }));
        let snapshot = ctrl.snapshot().await;
        assert!(snapshot.error.is_none());
        assert!(!snapshot.loading);
        assert_eq!(ctrl.client.calls(), 2);

        assert_eq!(ctrl.apply_url(url).await, SearchOutcome::Skipped);
    }

    #[test]
    fn test_client_errors_not_retryable() {
        assert!(!ErrorPanel::from(&SearchError::Status(404)).retryable);
        assert!(ErrorPanel::from(&SearchError::Status(429)).retryable);
        assert!(ErrorPanel::from(&SearchError::InvalidResponse("x".into())).retryable);
    }

    #[tokio::test]
    async fn test_invalid_location_changes_nothing() {
        let ctrl = controller(ScriptedSearch::default());
        ctrl.update_location(45.7578, 4.8320, LocationSource::SearchedPlace)
            .await
            .unwrap();
        let before = ctrl.url_query().await;

        let result = ctrl.update_location(95.0, 0.0, LocationSource::ManualClick).await;
        assert!(matches!(result, Err(LocationUpdateError::Invalid(_))));
        assert_eq!(ctrl.url_query().await, before);
        assert_eq!(ctrl.locations().current_location().coordinate.latitude(), 45.7578);
        assert_eq!(ctrl.client.calls(), 1);
    }

    #[tokio::test]
    async fn test_click_moves_reference_and_searches() {
        let ctrl = controller(ScriptedSearch::default());

        ctrl.handle_click(43.6047, 1.4442).await.unwrap();
        let snapshot = ctrl.snapshot().await;
        assert_eq!(snapshot.map.reference_marker.unwrap().position.latitude(), 43.6047);
        assert!(ctrl.client.seen.lock().unwrap()[0].starts_with("lat=43.6047&lng=1.4442"));
        assert_eq!(ctrl.locations().current_location().source, LocationSource::ManualClick);
    }

    #[tokio::test]
    async fn test_url_roundtrip() {
        let ctrl = controller(ScriptedSearch::default());

        ctrl.apply_url("?lat=45.75&lng=4.85&radius=25&domains=food&domains=travel&query=chef")
            .await;

        assert_eq!(
            ctrl.url_query().await,
            "lat=45.75&lng=4.85&radius=25&query=chef&domains=food&domains=travel"
        );
        // The URL location is not persisted
        assert_eq!(ctrl.locations().current_location().source, LocationSource::DefaultFallback);
    }

    #[tokio::test]
    async fn test_radius_change_triggers_new_query() {
        let ctrl = controller(ScriptedSearch::default());
        ctrl.search(false).await;

        ctrl.set_radius(10.0).await;
        assert_eq!(ctrl.client.calls(), 2);
        assert!(ctrl.client.seen.lock().unwrap()[1].contains("radius=10"));
    }

    #[tokio::test]
    async fn test_remove_domain_filter() {
        let ctrl = controller(ScriptedSearch::default());
        ctrl.apply_url("domains=food&domains=travel").await;

        ctrl.remove_filter("domains", Some("food")).await;
        let snapshot = ctrl.snapshot().await;
        assert_eq!(snapshot.filters.domains, vec!["travel"]);
        assert_eq!(ctrl.client.calls(), 2);
    }

    #[tokio::test]
    async fn test_debounced_radius_filters_map_immediately() {
        let ctrl = controller(ScriptedSearch::default());
        ctrl.set_radius_debounced(0.0, Duration::from_millis(10)).await;

        let snapshot = ctrl.snapshot().await;
        assert_eq!(snapshot.map.radius_km, 0.0);
        assert!(snapshot.map.radius_overlay.is_none());
    }

    #[tokio::test]
    async fn test_debounce_keeps_only_last_call() {
        let ctrl = Arc::new(controller(ScriptedSearch::default()));

        let first = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.search_debounced(Duration::from_millis(200)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = ctrl.search_debounced(Duration::from_millis(50)).await;

        assert_eq!(first.await.unwrap(), SearchOutcome::Superseded);
        assert!(matches!(second, SearchOutcome::Applied { .. }));
        assert_eq!(ctrl.client.calls(), 1);
    }

    /// Holds the first request until released so a second one can overtake it
    struct GatedSearch {
        gate: tokio::sync::Notify,
        calls: AtomicU64,
    }

    impl CreatorSearch for GatedSearch {
        async fn search(&self, _query: &MapQuery) -> Result<SearchPage, SearchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.notified().await;
                return Ok(page(vec![creator("old", 48.86, 2.35)]));
            }
            Ok(page(vec![creator("new", 48.87, 2.36)]))
        }
    }

    #[tokio::test]
    async fn test_stale_response_discarded() {
        let locations = Arc::new(LocationStore::in_memory());
        let map = MapView::initialize(MapConfig::default(), &locations.current_location());
        let ctrl = Arc::new(SearchController::new(
            GatedSearch {
                gate: tokio::sync::Notify::new(),
                calls: AtomicU64::new(0),
            },
            locations,
            map,
        ));

        let slow = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.search(false).await })
        };
        while ctrl.client.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let fresh = ctrl.set_radius(20.0).await;
        assert!(matches!(fresh, SearchOutcome::Applied { .. }));

        ctrl.client.gate.notify_one();
        assert_eq!(slow.await.unwrap(), SearchOutcome::Stale);

        let snapshot = ctrl.snapshot().await;
        assert_eq!(snapshot.results[0].id, "new");
    }

    #[tokio::test]
    async fn test_cancelled_search_not_remembered() {
        let locations = Arc::new(LocationStore::in_memory());
        let map = MapView::initialize(MapConfig::default(), &locations.current_location());
        let ctrl = Arc::new(SearchController::new(
            GatedSearch {
                gate: tokio::sync::Notify::new(),
                calls: AtomicU64::new(0),
            },
            locations,
            map,
        ));

        let pending = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.search(false).await })
        };
        while ctrl.client.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(ctrl.snapshot().await.loading);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert!(!ctrl.snapshot().await.loading);

        assert!(matches!(ctrl.search(false).await, SearchOutcome::Applied { visible: 1, .. }));
        assert_eq!(ctrl.client.calls.load(Ordering::SeqCst), 2);
    }
}
