use serde::{Deserialize, Serialize};

use crate::models::Coordinate;

/// Active search filters, mirrored with the page URL
///
/// `domains` is the only multi-valued key and is written as repeated
/// `domains=` parameters. Every other key appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub query: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    pub platform: Option<String>,
    pub min_followers: Option<u64>,
    pub min_age: Option<u8>,
    pub max_age: Option<u8>,
    pub gender: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub can_invoice: bool,
    #[serde(default)]
    pub verified_only: bool,
    pub min_rating: Option<f64>,
    pub page: Option<u32>,
}

/// A single active filter, as shown in the "active filters" strip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveFilter {
    pub key: &'static str,
    pub value: String,
}

impl SearchFilters {
    /// Apply one `key=value` pair; returns false for keys this type does not own
    ///
    /// Empty values and unparseable numbers clear the field, matching how a
    /// blank form input behaves.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let value = value.trim();
        let text = || (!value.is_empty()).then(|| value.to_string());

        match key {
            "query" => self.query = text(),
            "city" => self.city = text(),
            "domains" | "domain" => {
                if !value.is_empty() && !self.domains.iter().any(|d| d == value) {
                    self.domains.push(value.to_string());
                }
            }
            "platform" => self.platform = text().filter(|v| v != "all"),
            "min_followers" => self.min_followers = value.parse().ok(),
            "min_age" => self.min_age = value.parse().ok(),
            "max_age" => self.max_age = value.parse().ok(),
            "gender" => self.gender = text(),
            "content_type" => self.content_type = text(),
            "can_invoice" => self.can_invoice = parse_flag(value),
            "verified_only" => self.verified_only = parse_flag(value),
            "min_rating" => self.min_rating = value.parse().ok().filter(|r: &f64| r.is_finite()),
            "page" => self.page = value.parse::<u32>().ok().filter(|p| *p > 0),
            _ => return false,
        }

        true
    }

    /// Remove a filter; for `domains` only the given value is dropped
    pub fn remove(&mut self, key: &str, value: Option<&str>) {
        match (key, value) {
            ("domains" | "domain", Some(v)) => self.domains.retain(|d| d != v),
            ("domains" | "domain", None) => self.domains.clear(),
            ("can_invoice", _) => self.can_invoice = false,
            ("verified_only", _) => self.verified_only = false,
            (other, _) => {
                self.set(other, "");
            }
        }
    }

    /// Filters as ordered `(key, value)` pairs, skipping inactive ones
    ///
    /// The order is fixed so that two equal filter sets always serialize to
    /// the same query string.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();

        let mut push = |key: &'static str, value: Option<String>| {
            if let Some(v) = value {
                pairs.push((key, v));
            }
        };

        push("query", self.query.clone());
        push("city", self.city.clone());
        for domain in &self.domains {
            push("domains", Some(domain.clone()));
        }
        push("platform", self.platform.clone());
        push("min_followers", self.min_followers.map(|v| v.to_string()));
        push("min_age", self.min_age.map(|v| v.to_string()));
        push("max_age", self.max_age.map(|v| v.to_string()));
        push("gender", self.gender.clone());
        push("content_type", self.content_type.clone());
        push("can_invoice", self.can_invoice.then(|| "true".to_string()));
        push("verified_only", self.verified_only.then(|| "true".to_string()));
        push("min_rating", self.min_rating.map(|v| v.to_string()));
        push("page", self.page.map(|v| v.to_string()));

        pairs
    }

    /// Active filters, pagination excluded
    pub fn active(&self) -> Vec<ActiveFilter> {
        self.to_pairs()
            .into_iter()
            .filter(|(key, _)| *key != "page")
            .map(|(key, value)| ActiveFilter { key, value })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "on" | "1" | "yes")
}

/// Everything the page URL carries: reference point, radius and filters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UrlState {
    pub location: Option<Coordinate>,
    pub radius_km: Option<f64>,
    pub filters: SearchFilters,
}

impl UrlState {
    /// Parse a URL query string (with or without the leading `?`)
    ///
    /// `lat`/`lng` are only honored as a valid pair; an out-of-range pair is
    /// ignored rather than clamped. Unknown keys are ignored.
    pub fn from_query_string(query: &str) -> Self {
        let mut state = UrlState::default();
        let mut lat = None;
        let mut lng = None;

        for (key, value) in parse_query_pairs(query) {
            match key.as_str() {
                "lat" | "latitude" => lat = value.trim().parse::<f64>().ok(),
                "lng" | "lon" | "longitude" => lng = value.trim().parse::<f64>().ok(),
                "radius" => {
                    state.radius_km = value.trim().parse::<f64>().ok().filter(|r| r.is_finite())
                }
                other => {
                    if !state.filters.set(other, &value) {
                        tracing::trace!("Ignoring unknown URL parameter: {}", other);
                    }
                }
            }
        }

        if let (Some(lat), Some(lng)) = (lat, lng) {
            match Coordinate::new(lat, lng) {
                Ok(coordinate) => state.location = Some(coordinate),
                Err(e) => tracing::warn!("Ignoring URL location: {}", e),
            }
        }

        state
    }

    /// Serialize back to a query string (no leading `?`)
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if let Some(location) = &self.location {
            pairs.push(("lat", location.latitude().to_string()));
            pairs.push(("lng", location.longitude().to_string()));
        }
        if let Some(radius) = self.radius_km {
            pairs.push(("radius", radius.to_string()));
        }
        pairs.extend(self.filters.to_pairs());

        encode_pairs(&pairs)
    }
}

/// Split a query string into decoded pairs, keeping repeated keys
pub fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

/// Encode pairs as `k=v&k=v` using form encoding for values
pub fn encode_pairs(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced.clone(),
    }
}
