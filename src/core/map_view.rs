//! Map state: reference marker, radius overlay and clustered creator markers.
//!
//! Nothing here draws anything. The view keeps the state a map widget needs
//! (center, zoom, markers, overlay) so that a thin client can render it and
//! report clicks/pans back.

use std::collections::HashMap;
use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::core::distance::{
    calculate_bounding_box, filter_by_radius, format_distance, is_filtering_radius, DistanceStats,
};
use crate::models::{BoundingBox, Coordinate, CoordinateError, Entity, RankedEntity, ReferenceLocation};

/// Tile size used by slippy maps, in pixels
const TILE_SIZE: f64 = 256.0;

/// Highest zoom level served by the tile layer
pub const MAX_ZOOM: u8 = 19;

/// Marker clustering behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterOptions {
    /// From this zoom level on every marker is shown on its own
    pub disable_clustering_at_zoom: u8,
    /// Size of a clustering cell, in screen pixels
    pub max_cluster_radius_px: f64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            disable_clustering_at_zoom: 12,
            max_cluster_radius_px: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub initial_zoom: u8,
    pub default_radius_km: f64,
    /// Full width of the random marker offset per axis, in degrees
    /// (0.0006 keeps every marker within about 47 m of its creator)
    pub jitter_degrees: f64,
    /// Fixed seed for reproducible marker placement
    pub jitter_seed: Option<u64>,
    pub cluster: ClusterOptions,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_zoom: 11,
            default_radius_km: 50.0,
            jitter_degrees: 0.0006,
            jitter_seed: None,
            cluster: ClusterOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceMarker {
    pub position: Coordinate,
    pub popup: String,
}

/// Circle drawn around the reference location
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadiusOverlay {
    pub center: Coordinate,
    pub radius_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupContent {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub rating_label: String,
    pub distance_label: String,
    pub domains: Vec<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMarker {
    pub entity_id: String,
    /// Jittered display position
    pub position: Coordinate,
    pub title: String,
    pub popup: PopupContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerCluster {
    pub center: Coordinate,
    pub entity_ids: Vec<String>,
}

impl MarkerCluster {
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl From<BoundingBox> for Bounds {
    fn from(bbox: BoundingBox) -> Self {
        Self {
            south: bbox.min_lat.max(-90.0),
            west: bbox.min_lon.max(-180.0),
            north: bbox.max_lat.min(90.0),
            east: bbox.max_lon.min(180.0),
        }
    }
}

/// Serializable snapshot handed to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapState {
    pub center: Coordinate,
    pub zoom: u8,
    pub radius_km: f64,
    pub reference_marker: Option<ReferenceMarker>,
    pub radius_overlay: Option<RadiusOverlay>,
    /// Area to fit so the whole overlay is visible
    pub bounds: Option<Bounds>,
    pub clusters: Vec<MarkerCluster>,
    pub markers: Vec<EntityMarker>,
    pub open_popup: Option<String>,
    pub stats: DistanceStats,
    pub last_interaction: DateTime<Utc>,
}

/// Owns the map state for one page
pub struct MapView {
    config: MapConfig,
    center: Coordinate,
    zoom: u8,
    radius_km: f64,
    reference: Coordinate,
    reference_marker: Option<ReferenceMarker>,
    radius_overlay: Option<RadiusOverlay>,
    entities: Vec<Entity>,
    visible: Vec<RankedEntity>,
    markers: Vec<EntityMarker>,
    open_popup: Option<String>,
    last_interaction: DateTime<Utc>,
    rng: StdRng,
}

impl MapView {
    /// Create the view centered on the initial reference location
    pub fn initialize(config: MapConfig, initial: &ReferenceLocation) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut view = Self {
            center: initial.coordinate,
            zoom: config.initial_zoom.min(MAX_ZOOM),
            radius_km: config.default_radius_km,
            reference: initial.coordinate,
            reference_marker: None,
            radius_overlay: None,
            entities: Vec::new(),
            visible: Vec::new(),
            markers: Vec::new(),
            open_popup: None,
            last_interaction: Utc::now(),
            rng,
            config,
        };

        view.set_reference_location(initial.coordinate, None);
        view
    }

    /// Move the reference point: re-center, move the marker, redraw the
    /// overlay and re-filter the current dataset
    pub fn set_reference_location(&mut self, coordinate: Coordinate, zoom: Option<u8>) -> &[RankedEntity] {
        self.reference = coordinate;
        self.center = coordinate;
        if let Some(zoom) = zoom {
            self.zoom = zoom.min(MAX_ZOOM);
        }

        match &mut self.reference_marker {
            Some(marker) => marker.position = coordinate,
            None => {
                self.reference_marker = Some(ReferenceMarker {
                    position: coordinate,
                    popup: "Your position (click elsewhere to move)".to_string(),
                })
            }
        }

        self.update_overlay();
        self.refilter();
        &self.visible
    }

    /// Change the search radius; `<= 0` disables distance filtering
    pub fn set_radius(&mut self, radius_km: f64) -> &[RankedEntity] {
        self.radius_km = radius_km;
        self.update_overlay();
        self.refilter();
        &self.visible
    }

    /// Replace the dataset and rebuild every marker
    pub fn render_entities(&mut self, entities: Vec<Entity>) -> &[RankedEntity] {
        self.entities = entities;
        self.open_popup = None;
        self.refilter();
        &self.visible
    }

    /// A click on the map, validated into the next reference location
    ///
    /// The view is not moved here; the caller persists the coordinate and
    /// then calls [`MapView::set_reference_location`].
    pub fn handle_click(&mut self, latitude: f64, longitude: f64) -> Result<Coordinate, CoordinateError> {
        self.touch();
        Coordinate::new(latitude, longitude)
    }

    pub fn on_move(&mut self, center: Coordinate) {
        self.center = center;
        self.touch();
    }

    pub fn on_zoom(&mut self, zoom: u8) {
        self.zoom = zoom.min(MAX_ZOOM);
        self.touch();
    }

    /// Open a creator's popup from the list and zoom in far enough for its
    /// marker to leave its cluster
    pub fn focus_entity(&mut self, entity_id: &str) -> Option<&EntityMarker> {
        let index = self.markers.iter().position(|m| m.entity_id == entity_id)?;

        self.center = self.markers[index].position;
        self.zoom = self.zoom.max(self.config.cluster.disable_clustering_at_zoom);
        self.open_popup = Some(entity_id.to_string());
        self.touch();

        self.markers.get(index)
    }

    pub fn reference(&self) -> Coordinate {
        self.reference
    }

    pub fn center(&self) -> Coordinate {
        self.center
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    pub fn radius_overlay(&self) -> Option<&RadiusOverlay> {
        self.radius_overlay.as_ref()
    }

    pub fn reference_marker(&self) -> Option<&ReferenceMarker> {
        self.reference_marker.as_ref()
    }

    /// Entities currently inside the radius, in dataset order
    pub fn visible(&self) -> &[RankedEntity] {
        &self.visible
    }

    pub fn markers(&self) -> &[EntityMarker] {
        &self.markers
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Group markers that would overlap at the current zoom level
    ///
    /// Markers are bucketed into square cells of `max_cluster_radius_px`
    /// in Web-Mercator pixel space. From `disable_clustering_at_zoom` on,
    /// every marker is its own cluster.
    pub fn clusters(&self) -> Vec<MarkerCluster> {
        if self.zoom >= self.config.cluster.disable_clustering_at_zoom
            || self.config.cluster.max_cluster_radius_px <= 0.0
        {
            return self
                .markers
                .iter()
                .map(|m| MarkerCluster {
                    center: m.position,
                    entity_ids: vec![m.entity_id.clone()],
                })
                .collect();
        }

        let cell_size = self.config.cluster.max_cluster_radius_px;
        let mut order: Vec<(i64, i64)> = Vec::new();
        let mut cells: HashMap<(i64, i64), Vec<&EntityMarker>> = HashMap::new();

        for marker in &self.markers {
            let (x, y) = project(&marker.position, self.zoom);
            let cell = ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64);
            let members = cells.entry(cell).or_default();
            if members.is_empty() {
                order.push(cell);
            }
            members.push(marker);
        }

        order
            .into_iter()
            .filter_map(|cell| cells.remove(&cell))
            .map(|members| {
                let n = members.len() as f64;
                let lat = members.iter().map(|m| m.position.latitude()).sum::<f64>() / n;
                let lon = members.iter().map(|m| m.position.longitude()).sum::<f64>() / n;
                MarkerCluster {
                    // Means of valid coordinates are valid; keep the first member otherwise
                    center: Coordinate::new(lat, lon).unwrap_or(members[0].position),
                    entity_ids: members.iter().map(|m| m.entity_id.clone()).collect(),
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> MapState {
        let bounds = self
            .radius_overlay
            .filter(|_| is_filtering_radius(self.radius_km))
            .map(|overlay| Bounds::from(calculate_bounding_box(&overlay.center, self.radius_km)));

        MapState {
            center: self.center,
            zoom: self.zoom,
            radius_km: self.radius_km,
            reference_marker: self.reference_marker.clone(),
            radius_overlay: self.radius_overlay,
            bounds,
            clusters: self.clusters(),
            markers: self.markers.clone(),
            open_popup: self.open_popup.clone(),
            stats: DistanceStats::from_distances(self.visible.iter().map(|r| r.distance_km)),
            last_interaction: self.last_interaction,
        }
    }

    fn update_overlay(&mut self) {
        self.radius_overlay = is_filtering_radius(self.radius_km).then(|| RadiusOverlay {
            center: self.reference,
            radius_m: self.radius_km * 1000.0,
        });
    }

    fn refilter(&mut self) {
        self.visible = filter_by_radius(&self.reference, self.entities.iter().cloned(), self.radius_km);

        let jitter = self.config.jitter_degrees;
        let mut markers = Vec::with_capacity(self.visible.len());
        for ranked in &self.visible {
            let position = jittered(&mut self.rng, &ranked.entity.coordinate, jitter);
            markers.push(build_marker(ranked, position));
        }
        self.markers = markers;

        let popup_gone = self
            .open_popup
            .as_ref()
            .is_some_and(|open| !self.markers.iter().any(|m| &m.entity_id == open));
        if popup_gone {
            self.open_popup = None;
        }

        tracing::debug!(
            "Map filtered {} of {} creators within {}km",
            self.visible.len(),
            self.entities.len(),
            self.radius_km
        );
    }

    fn touch(&mut self) {
        self.last_interaction = Utc::now();
    }
}

/// Offset a position by up to `width / 2` degrees on each axis
///
/// Presentation only; never feed the result into distance checks.
fn jittered(rng: &mut StdRng, coordinate: &Coordinate, width: f64) -> Coordinate {
    if !(width.is_finite() && width > 0.0) {
        return *coordinate;
    }

    let d_lat = (rng.random::<f64>() - 0.5) * width;
    let d_lon = (rng.random::<f64>() - 0.5) * width;

    Coordinate::new(coordinate.latitude() + d_lat, coordinate.longitude() + d_lon).unwrap_or(*coordinate)
}

fn build_marker(ranked: &RankedEntity, position: Coordinate) -> EntityMarker {
    let entity = &ranked.entity;

    EntityMarker {
        entity_id: entity.id.clone(),
        position,
        title: entity.display_name.clone(),
        popup: PopupContent {
            title: entity.display_name.clone(),
            thumbnail_url: entity.thumbnail_url.clone(),
            rating_label: match entity.rating {
                Some(r) => format!("⭐ {:.1}", r),
                None => "Not rated".to_string(),
            },
            distance_label: format_distance(ranked.distance_km),
            domains: entity.domains.iter().take(3).cloned().collect(),
            url: entity.url.clone(),
        },
    }
}

/// Web-Mercator pixel position at a zoom level
fn project(coordinate: &Coordinate, zoom: u8) -> (f64, f64) {
    let scale = TILE_SIZE * 2f64.powi(zoom as i32);
    // Mercator is undefined at the poles
    let lat = coordinate.latitude().clamp(-85.051_128_78, 85.051_128_78).to_radians();

    let x = (coordinate.longitude() + 180.0) / 360.0 * scale;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * scale;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distance::distance_km;
    use crate::models::LocationSource;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn entity(id: &str, lat: f64, lon: f64) -> Entity {
        Entity {
            id: id.to_string(),
            coordinate: coord(lat, lon),
            display_name: format!("Creator {}", id),
            rating: Some(4.3),
            thumbnail_url: None,
            domains: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            url: format!("/creators/creator/{}/", id),
        }
    }

    fn seeded_view(seed: u64) -> MapView {
        let config = MapConfig {
            jitter_seed: Some(seed),
            ..MapConfig::default()
        };
        MapView::initialize(config, &ReferenceLocation::new(coord(48.8566, 2.3522), LocationSource::ManualClick))
    }

    fn dataset() -> Vec<Entity> {
        vec![
            entity("versailles", 48.8049, 2.1204),
            entity("lyon", 45.7640, 4.8357),
            entity("saint-denis", 48.9362, 2.3574),
        ]
    }

    #[test]
    fn test_initialize_places_reference_and_overlay() {
        let view = seeded_view(1);

        assert_eq!(view.zoom(), 11);
        assert_eq!(view.reference_marker().unwrap().position, coord(48.8566, 2.3522));
        assert_eq!(view.radius_overlay().unwrap().radius_m, 50_000.0);
    }

    #[test]
    fn test_render_filters_by_radius() {
        let mut view = seeded_view(1);
        let visible: Vec<String> = view.render_entities(dataset()).iter().map(|r| r.entity.id.clone()).collect();

        assert_eq!(visible, vec!["versailles", "saint-denis"]);
        assert_eq!(view.markers().len(), 2);
        assert_eq!(view.entity_count(), 3);
    }

    #[test]
    fn test_moving_reference_refilters() {
        let mut view = seeded_view(1);
        view.render_entities(dataset());

        let visible = view.set_reference_location(coord(45.7578, 4.8320), Some(12));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].entity.id, "lyon");
        assert_eq!(view.zoom(), 12);
        assert_eq!(view.radius_overlay().unwrap().center, coord(45.7578, 4.8320));
    }

    #[test]
    fn test_zero_radius_shows_everything_without_overlay() {
        let mut view = seeded_view(1);
        view.render_entities(dataset());

        assert_eq!(view.set_radius(0.0).len(), 3);
        assert!(view.radius_overlay().is_none());
        assert!(view.snapshot().bounds.is_none());
    }

    #[test]
    fn test_jitter_is_small_and_seeded() {
        let mut a = seeded_view(42);
        let mut b = seeded_view(42);
        a.render_entities(dataset());
        b.render_entities(dataset());

        assert_eq!(a.markers(), b.markers());

        for (marker, ranked) in a.markers().iter().zip(a.visible()) {
            let offset_km = distance_km(&marker.position, &ranked.entity.coordinate);
            assert!(offset_km <= 0.05, "jitter too large: {}km", offset_km);
        }
    }

    #[test]
    fn test_click_rejects_invalid() {
        let mut view = seeded_view(1);
        assert!(view.handle_click(95.0, 0.0).is_err());
        assert_eq!(view.handle_click(45.0, 4.0).unwrap(), coord(45.0, 4.0));
        // Clicking does not move the reference by itself
        assert_eq!(view.reference(), coord(48.8566, 2.3522));
    }

    #[test]
    fn test_popup_content() {
        let mut view = seeded_view(1);
        view.render_entities(dataset());

        let popup = &view.markers()[0].popup;
        assert_eq!(popup.rating_label, "⭐ 4.3");
        assert_eq!(popup.domains.len(), 3);
        assert!(popup.distance_label.ends_with("km"));
    }

    #[test]
    fn test_clusters_merge_nearby_markers() {
        let mut view = seeded_view(7);
        view.render_entities(vec![
            entity("a", 48.8566, 2.3522),
            entity("b", 48.8567, 2.3523),
            entity("far", 48.9362, 2.3574),
        ]);

        view.on_zoom(5);
        let clusters = view.clusters();
        assert_eq!(clusters.iter().map(MarkerCluster::len).sum::<usize>(), 3);
        assert!(clusters.iter().any(|c| c.len() >= 2));

        view.on_zoom(14);
        assert_eq!(view.clusters().len(), 3);
    }

    #[test]
    fn test_focus_entity_from_list() {
        let mut view = seeded_view(3);
        view.render_entities(dataset());

        let marker = view.focus_entity("saint-denis").cloned().unwrap();
        assert_eq!(view.center(), marker.position);
        assert!(view.zoom() >= 12);
        assert_eq!(view.snapshot().open_popup.as_deref(), Some("saint-denis"));

        assert!(view.focus_entity("lyon").is_none());
    }

    #[test]
    fn test_snapshot_stats() {
        let mut view = seeded_view(1);
        view.render_entities(dataset());

        let state = view.snapshot();
        assert_eq!(state.stats.count, 2);
        assert!(state.bounds.unwrap().north > 48.8566);
    }
}
