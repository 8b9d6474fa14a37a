use serde::{Deserialize, Serialize};

use crate::util::coord_key;

// ------------------------------------------------------------
// POI record
// ------------------------------------------------------------
//
// One observed place, normalized across all providers.
//
// Produced exclusively by a provider adapter's parse step and
// never mutated afterwards. The store only ever inserts or
// ignores it (identity key upsert).
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Poi {
    /// Display name, trimmed and never empty
    pub name: String,

    /// WGS84 longitude
    pub lon: f64,

    /// WGS84 latitude
    pub lat: f64,

    /// Longitude in the provider's native projection
    pub original_lon: f64,

    /// Latitude in the provider's native projection
    pub original_lat: f64,

    /// Human readable category label
    pub category: String,

    /// Stable category code (category id, type code, or "grid")
    pub category_id: String,

    pub address: Option<String>,

    pub phone: Option<String>,

    /// Provider identifier (e.g. "amap")
    pub platform: String,

    /// Serialized provider record, kept for audit/debugging
    pub raw_payload: String,
}

/// Deduplication key of a POI.
///
/// Two records with the same name and platform whose coordinates agree
/// to five decimal places are the same place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub name: String,
    pub platform: String,
    pub lon_key: i64,
    pub lat_key: i64,
}

impl Poi {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            name: self.name.clone(),
            platform: self.platform.clone(),
            lon_key: coord_key(self.lon),
            lat_key: coord_key(self.lat),
        }
    }
}

// ------------------------------------------------------------
// Work units
// ------------------------------------------------------------
//
// One enumerable item driving one or more paged API calls.
//
// Enumeration order is deterministic for a given configuration,
// which is what makes checkpoint resumption exact. Every unit has
// a stable string id that checkpoints refer to.
//
#[derive(Debug, Clone, PartialEq)]
pub enum WorkUnit {
    /// Keyword search attributed to a category
    Keyword {
        category_id: String,
        category: String,
        keyword: String,
    },

    /// Provider type-code search
    TypeCode { code: String, label: String },

    /// Spatial search around one grid cell center (WGS84)
    GridCell {
        index: usize,
        lon: f64,
        lat: f64,
        half_step: f64,
        radius_m: u32,
        keyword: Option<String>,
    },
}

impl WorkUnit {
    /// Stable id stored in checkpoints.
    pub fn id(&self) -> String {
        match self {
            WorkUnit::Keyword {
                category_id,
                keyword,
                ..
            } => format!("kw:{}:{}", category_id, keyword),
            WorkUnit::TypeCode { code, .. } => format!("type:{}", code),
            WorkUnit::GridCell { index, .. } => format!("grid:{}", index),
        }
    }

    /// Grid cells are queried exactly once; everything else pages.
    pub fn is_paged(&self) -> bool {
        !matches!(self, WorkUnit::GridCell { .. })
    }

    /// Default (label, id) attributed to records found by this unit.
    pub fn category(&self) -> (&str, &str) {
        match self {
            WorkUnit::Keyword {
                category,
                category_id,
                ..
            } => (category.as_str(), category_id.as_str()),
            WorkUnit::TypeCode { code, label } => (label.as_str(), code.as_str()),
            WorkUnit::GridCell { .. } => ("网格搜索", "grid"),
        }
    }
}

impl std::fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkUnit::Keyword {
                category, keyword, ..
            } => write!(f, "{}/{}", category, keyword),
            WorkUnit::TypeCode { code, label } => write!(f, "{} ({})", label, code),
            WorkUnit::GridCell { index, lon, lat, .. } => {
                write!(f, "cell #{} ({:.4},{:.4})", index, lon, lat)
            }
        }
    }
}

// ------------------------------------------------------------
// Drop reasons
// ------------------------------------------------------------
//
// Every candidate discarded during parsing is classified so that
// tests and debug logs can tell *why* a record never reached the
// store. Dropping is never an error for the work unit.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No location field at all
    MissingCoordinates,

    /// Location present but not parseable (or zero)
    MalformedCoordinates,

    /// Converted WGS84 point lies outside the active region
    OutOfBounds,

    /// Name missing or blank after trimming
    EmptyName,
}

impl DropReason {
    pub fn code(self) -> &'static str {
        match self {
            DropReason::MissingCoordinates => "missing_coordinates",
            DropReason::MalformedCoordinates => "malformed_coordinates",
            DropReason::OutOfBounds => "out_of_bounds",
            DropReason::EmptyName => "empty_name",
        }
    }
}

/// Result of parsing one page of provider results.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Accepted, normalized records in provider order
    pub pois: Vec<Poi>,

    /// Reason for every rejected candidate, in provider order
    pub dropped: Vec<DropReason>,

    /// Number of raw candidates the provider returned
    pub raw_count: usize,

    /// Whether another page should be requested
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poi(name: &str, lon: f64, lat: f64) -> Poi {
        Poi {
            name: name.to_string(),
            lon,
            lat,
            original_lon: lon,
            original_lat: lat,
            category: "学校".to_string(),
            category_id: "school".to_string(),
            address: None,
            phone: None,
            platform: "tianditu".to_string(),
            raw_payload: "{}".to_string(),
        }
    }

    #[test]
    fn identity_ignores_sub_metre_jitter() {
        let a = poi("阜宁中学", 119.8012341, 33.7712341);
        let b = poi("阜宁中学", 119.8012339, 33.7712339);
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn identity_distinguishes_platform_and_name() {
        let a = poi("阜宁中学", 119.80123, 33.77123);
        let mut b = a.clone();
        b.platform = "amap".to_string();
        let c = poi("阜宁高级中学", 119.80123, 33.77123);
        assert_ne!(a.identity_key(), b.identity_key());
        assert_ne!(a.identity_key(), c.identity_key());
    }
}
