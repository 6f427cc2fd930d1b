//! List view of the creators shown on the map

use serde::Serialize;
use serde_json::Value;

use crate::core::distance::format_distance;
use crate::models::RankedEntity;

/// Star breakdown of a rating out of five
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stars {
    pub full: u8,
    pub half: u8,
    pub empty: u8,
}

impl Stars {
    /// A star counts as half once the rating reaches its midpoint
    pub fn from_rating(rating: f64) -> Self {
        let rating = if rating.is_finite() { rating.clamp(0.0, 5.0) } else { 0.0 };

        let mut stars = Self { full: 0, half: 0, empty: 0 };
        for i in 1..=5 {
            let i = i as f64;
            if i <= rating {
                stars.full += 1;
            } else if i - 0.5 <= rating {
                stars.half += 1;
            } else {
                stars.empty += 1;
            }
        }
        stars
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListEntry {
    pub id: String,
    pub name: String,
    pub rating: Option<f64>,
    pub stars: Stars,
    pub distance_label: String,
    pub domains: Vec<String>,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

impl From<&RankedEntity> for ListEntry {
    fn from(ranked: &RankedEntity) -> Self {
        let entity = &ranked.entity;
        Self {
            id: entity.id.clone(),
            name: entity.display_name.clone(),
            rating: entity.rating,
            stars: Stars::from_rating(entity.rating.unwrap_or(0.0)),
            distance_label: format_distance(ranked.distance_km),
            domains: entity.domains.iter().take(3).cloned().collect(),
            url: entity.url.clone(),
            thumbnail_url: entity.thumbnail_url.clone(),
        }
    }
}

/// Build list entries, keeping the given order
pub fn list_entries(visible: &[RankedEntity]) -> Vec<ListEntry> {
    visible.iter().map(ListEntry::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current: u32,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(current: u32, total_pages: u32) -> Self {
        let total_pages = total_pages.max(1);
        Self {
            current: current.clamp(1, total_pages),
            total_pages,
        }
    }

    /// Read `page`/`current_page` and `total_pages`/`num_pages` from the
    /// search metadata; falls back to `total` and `page_size`
    pub fn from_meta(meta: Option<&Value>, requested_page: Option<u32>, total: Option<u64>) -> Self {
        let field = |names: &[&str]| -> Option<u64> {
            let meta = meta?;
            names.iter().find_map(|name| meta.get(*name).and_then(Value::as_u64))
        };

        let current = field(&["page", "current_page"])
            .map(|p| p as u32)
            .or(requested_page)
            .unwrap_or(1);

        let total_pages = field(&["total_pages", "num_pages"]).or_else(|| {
            let page_size = field(&["page_size", "per_page"])?;
            let total = total.or_else(|| field(&["total", "count"]))?;
            (page_size > 0).then(|| total.div_ceil(page_size))
        });

        Self::new(current, total_pages.unwrap_or(1) as u32)
    }

    /// Nothing to paginate when everything fits on one page
    pub fn is_needed(&self) -> bool {
        self.total_pages > 1
    }

    pub fn previous_page(&self) -> Option<u32> {
        (self.current > 1).then(|| self.current - 1)
    }

    pub fn next_page(&self) -> Option<u32> {
        (self.current < self.total_pages).then(|| self.current + 1)
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> {
        1..=self.total_pages
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinate, Entity};
    use serde_json::json;

    #[test]
    fn test_stars() {
        assert_eq!(Stars::from_rating(4.5), Stars { full: 4, half: 1, empty: 0 });
        assert_eq!(Stars::from_rating(3.2), Stars { full: 3, half: 0, empty: 2 });
        assert_eq!(Stars::from_rating(0.0), Stars { full: 0, half: 0, empty: 5 });
        assert_eq!(Stars::from_rating(7.0), Stars { full: 5, half: 0, empty: 0 });
        assert_eq!(Stars::from_rating(f64::NAN), Stars { full: 0, half: 0, empty: 5 });
    }

    #[test]
    fn test_list_entry() {
        let ranked = RankedEntity::new(
            Entity {
                id: "7".into(),
                coordinate: Coordinate::new(48.8, 2.3).unwrap(),
                display_name: "Chloé".into(),
                rating: None,
                thumbnail_url: None,
                domains: vec!["Mode".into(), "Beauté".into(), "Voyage".into(), "Sport".into()],
                url: "/creators/creator/7/".into(),
            },
            3.456,
        );

        let entries = list_entries(std::slice::from_ref(&ranked));
        assert_eq!(entries[0].distance_label, "3.5 km");
        assert_eq!(entries[0].domains.len(), 3);
        assert_eq!(entries[0].stars.empty, 5);
    }

    #[test]
    fn test_pagination_links() {
        let p = Pagination::new(1, 3);
        assert!(p.is_needed());
        assert_eq!(p.previous_page(), None);
        assert_eq!(p.next_page(), Some(2));
        assert_eq!(p.pages().collect::<Vec<_>>(), vec![1, 2, 3]);

        let last = Pagination::new(9, 3);
        assert_eq!(last.current, 3);
        assert_eq!(last.next_page(), None);

        assert!(!Pagination::default().is_needed());
    }

    #[test]
    fn test_pagination_from_meta() {
        let meta = json!({"page": 2, "total_pages": 4});
        assert_eq!(Pagination::from_meta(Some(&meta), None, None), Pagination::new(2, 4));

        let meta = json!({"page_size": 20});
        assert_eq!(Pagination::from_meta(Some(&meta), Some(3), Some(45)), Pagination::new(3, 3));

        assert_eq!(Pagination::from_meta(None, Some(2), Some(100)), Pagination::new(1, 1));
    }
}
