//! Region configuration (read-only input).
//!
//! The active region decides the bounding box every candidate POI is
//! checked against and supplies the admin/city codes some providers
//! require. It is owned by an external configuration collaborator; the
//! pipeline only reads it through [`RegionSource`], once per work unit.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// Inclusive containment test on WGS84 coordinates.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }

    pub fn is_valid(&self) -> bool {
        self.min_lon < self.max_lon && self.min_lat < self.max_lat
    }

    /// "min_lon,min_lat,max_lon,max_lat", the order Tianditu expects.
    pub fn to_lon_lat_string(&self) -> String {
        format!("{},{},{},{}", self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Display name, e.g. "阜宁县"
    pub name: String,

    /// Administrative division code (Tianditu `specify`)
    pub admin_code: String,

    /// City code (Amap `city`)
    pub city_code: String,

    pub bounds: Bounds,

    /// (lon, lat)
    pub center: [f64; 2],
}

impl Region {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("region name must not be empty");
        }
        if !self.bounds.is_valid() {
            bail!("region '{}' has an empty bounding box", self.name);
        }
        Ok(())
    }
}

/// Supplies the currently active region.
///
/// Implementations may re-read external state on every call; the
/// orchestrator calls this at the start of each work unit.
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn current(&self) -> Result<Region>;
}

/// A fixed region (presets, inline configuration, tests).
#[derive(Debug, Clone)]
pub struct StaticRegion(pub Region);

#[async_trait]
impl RegionSource for StaticRegion {
    async fn current(&self) -> Result<Region> {
        Ok(self.0.clone())
    }
}

/// A region JSON document on disk, re-read on every call so that an
/// operator can switch regions between runs without a restart.
#[derive(Debug, Clone)]
pub struct FileRegionSource {
    path: PathBuf,
}

impl FileRegionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegionSource for FileRegionSource {
    async fn current(&self) -> Result<Region> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read region file {}", self.path.display()))?;
        let region: Region = serde_json::from_str(&data)
            .with_context(|| format!("invalid region file {}", self.path.display()))?;
        region.validate()?;
        Ok(region)
    }
}

// ------------------------------------------------------------
// Presets
// ------------------------------------------------------------
//
// Counties of Yancheng (Jiangsu) the collector was first run on,
// plus a few neighbouring cities.
//
// (key, name, admin_code, city_code, [min_lon, max_lon, min_lat, max_lat], center)
//
const PRESETS: &[(&str, &str, &str, &str, [f64; 4], [f64; 2])] = &[
    ("funing", "阜宁县", "320923", "320900", [119.45, 119.95, 33.55, 34.05], [119.5536, 33.7825]),
    ("sheyang", "射阳县", "320924", "320900", [119.75, 120.55, 33.55, 34.05], [120.2294, 33.7758]),
    ("jianhu", "建湖县", "320925", "320900", [119.60, 120.00, 33.30, 33.65], [119.7985, 33.4646]),
    ("binhai", "滨海县", "320922", "320900", [119.70, 120.35, 33.90, 34.35], [119.8206, 34.0964]),
    ("xiangshui", "响水县", "320921", "320900", [119.50, 120.00, 34.10, 34.50], [119.5784, 34.1991]),
    ("tinghu", "亭湖区", "320902", "320900", [119.90, 120.35, 33.30, 33.55], [120.1975, 33.3908]),
    ("yancheng", "盐城市", "320900", "320900", [119.27, 120.95, 32.85, 34.50], [120.1394, 33.3776]),
    ("donghai", "东海县", "320722", "320700", [118.45, 119.10, 34.30, 34.80], [118.7524, 34.5424]),
    ("nanjing", "南京市", "320100", "320100", [118.35, 119.25, 31.20, 32.60], [118.7969, 32.0603]),
    ("suzhou", "苏州市", "320500", "320500", [120.05, 121.35, 30.75, 32.05], [120.6195, 31.2993]),
];

/// Looks up a preset region by key (e.g. "funing").
pub fn preset(key: &str) -> Option<Region> {
    PRESETS
        .iter()
        .find(|(k, ..)| *k == key)
        .map(|(_, name, admin_code, city_code, b, center)| Region {
            name: name.to_string(),
            admin_code: admin_code.to_string(),
            city_code: city_code.to_string(),
            bounds: Bounds {
                min_lon: b[0],
                max_lon: b[1],
                min_lat: b[2],
                max_lat: b[3],
            },
            center: *center,
        })
}

pub fn preset_keys() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(k, ..)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        let region = preset("funing").unwrap();
        assert!(region.bounds.contains(119.45, 33.55));
        assert!(region.bounds.contains(119.95, 34.05));
        assert!(!region.bounds.contains(119.96, 33.8));
        assert!(!region.bounds.contains(119.6, 33.54));
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("atlantis").is_none());
        assert!(preset_keys().any(|k| k == "jianhu"));
    }

    #[test]
    fn presets_carry_their_own_city_codes() {
        let cases = [
            ("funing", "320923", "320900", [119.45, 119.95, 33.55, 34.05]),
            ("yancheng", "320900", "320900", [119.27, 120.95, 32.85, 34.50]),
            ("donghai", "320722", "320700", [118.45, 119.10, 34.30, 34.80]),
            ("nanjing", "320100", "320100", [118.35, 119.25, 31.20, 32.60]),
            ("suzhou", "320500", "320500", [120.05, 121.35, 30.75, 32.05]),
        ];
        for (key, admin, city, b) in cases {
            let region = preset(key).unwrap();
            assert_eq!(region.admin_code, admin, "{}", key);
            assert_eq!(region.city_code, city, "{}", key);
            assert_eq!(
                [region.bounds.min_lon, region.bounds.max_lon, region.bounds.min_lat, region.bounds.max_lat],
                b,
                "{}",
                key
            );
        }
        assert_eq!(preset("donghai").unwrap().name, "东海县");
        assert_eq!(preset_keys().count(), 10);
        assert!(preset_keys().all(|k| preset(k).unwrap().validate().is_ok()));
    }

    #[tokio::test]
    async fn file_source_rereads_on_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.json");
        let mut region = preset("funing").unwrap();
        std::fs::write(&path, serde_json::to_string(&region).unwrap()).unwrap();

        let source = FileRegionSource::new(&path);
        assert_eq!(source.current().await.unwrap().name, "阜宁县");

        region.name = "射阳县".to_string();
        std::fs::write(&path, serde_json::to_string(&region).unwrap()).unwrap();
        assert_eq!(source.current().await.unwrap().name, "射阳县");
    }

    #[tokio::test]
    async fn file_source_rejects_empty_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.json");
        let mut region = preset("funing").unwrap();
        region.bounds.max_lon = region.bounds.min_lon;
        std::fs::write(&path, serde_json::to_string(&region).unwrap()).unwrap();
        assert!(FileRegionSource::new(&path).current().await.is_err());
    }
}
