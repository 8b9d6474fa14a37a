//! SQLite persistence for POIs and credentials.
//!
//! The only write pattern for POIs is an identity-key upsert
//! (`ON CONFLICT DO NOTHING`), so concurrent provider tasks can share
//! one pool without read-modify-write races. Duplicates are reported as
//! `inserted = false`, never as errors.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::schema::{IdentityKey, Poi};
use crate::util::{coord_key, now_ms};

/// Opens (creating if needed) the SQLite database at `path`.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Creates tables and indexes. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pois (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            lon REAL NOT NULL,
            lat REAL NOT NULL,
            lon_key INTEGER NOT NULL,
            lat_key INTEGER NOT NULL,
            original_lon REAL,
            original_lat REAL,
            category TEXT,
            category_id TEXT,
            address TEXT,
            phone TEXT,
            platform TEXT NOT NULL,
            raw_data TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(name, platform, lon_key, lat_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            api_key TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            quota_exhausted INTEGER NOT NULL DEFAULT 0,
            last_used_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(platform, api_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pois_platform ON pois(platform)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pois_category ON pois(category_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_keys_platform ON api_keys(platform)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Destination for normalized POIs.
///
/// The orchestrator depends on this narrow contract only, so other
/// stores (or test doubles) can be plugged in.
#[async_trait]
pub trait PoiSink: Send + Sync {
    /// Inserts `poi` unless a record with the same identity key exists.
    ///
    /// Returns `true` when a new row was written.
    async fn upsert(&self, poi: &Poi) -> Result<bool>;
}

/// SQLite-backed POI store.
#[derive(Clone)]
pub struct PoiStore {
    pool: SqlitePool,
}

impl PoiStore {
    /// Connects and migrates.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = connect(path).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of stored POIs, optionally for one platform.
    pub async fn count(&self, platform: Option<&str>) -> Result<i64> {
        let n: i64 = match platform {
            Some(p) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM pois WHERE platform = ?")
                    .bind(p)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM pois")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(n)
    }

    /// Bulk "clear platform" operation. Returns the number of deleted rows.
    pub async fn clear_platform(&self, platform: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pois WHERE platform = ?")
            .bind(platform)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All identity keys of a platform, sorted.
    pub async fn identity_keys(&self, platform: &str) -> Result<Vec<IdentityKey>> {
        let rows = sqlx::query(
            "SELECT name, platform, lon_key, lat_key FROM pois WHERE platform = ? \
             ORDER BY name, lon_key, lat_key",
        )
        .bind(platform)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<IdentityKey> {
                Ok(IdentityKey {
                    name: r.try_get("name")?,
                    platform: r.try_get("platform")?,
                    lon_key: r.try_get("lon_key")?,
                    lat_key: r.try_get("lat_key")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PoiSink for PoiStore {
    async fn upsert(&self, poi: &Poi) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pois (name, lon, lat, lon_key, lat_key, original_lon, original_lat,
                              category, category_id, address, phone, platform, raw_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name, platform, lon_key, lat_key) DO NOTHING
            "#,
        )
        .bind(&poi.name)
        .bind(poi.lon)
        .bind(poi.lat)
        .bind(coord_key(poi.lon))
        .bind(coord_key(poi.lat))
        .bind(poi.original_lon)
        .bind(poi.original_lat)
        .bind(&poi.category)
        .bind(&poi.category_id)
        .bind(&poi.address)
        .bind(&poi.phone)
        .bind(&poi.platform)
        .bind(&poi.raw_payload)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poi(name: &str, platform: &str, lon: f64, lat: f64) -> Poi {
        Poi {
            name: name.to_string(),
            lon,
            lat,
            original_lon: lon,
            original_lat: lat,
            category: "学校".to_string(),
            category_id: "school".to_string(),
            address: Some("阜城大街".to_string()),
            phone: None,
            platform: platform.to_string(),
            raw_payload: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_upsert_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = PoiStore::open(&dir.path().join("poi.db")).await.unwrap();

        let p = poi("阜宁中学", "amap", 119.801234, 33.771234);
        assert!(store.upsert(&p).await.unwrap());
        assert!(!store.upsert(&p).await.unwrap());

        // sub-key jitter is the same place
        let jittered = poi("阜宁中学", "amap", 119.8012341, 33.7712339);
        assert!(!store.upsert(&jittered).await.unwrap());

        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn platform_is_part_of_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = PoiStore::open(&dir.path().join("poi.db")).await.unwrap();

        assert!(store.upsert(&poi("阜宁中学", "amap", 119.8, 33.77)).await.unwrap());
        assert!(store.upsert(&poi("阜宁中学", "baidu", 119.8, 33.77)).await.unwrap());
        assert_eq!(store.count(Some("amap")).await.unwrap(), 1);
        assert_eq!(store.count(None).await.unwrap(), 2);

        assert_eq!(store.clear_platform("amap").await.unwrap(), 1);
        assert_eq!(store.count(None).await.unwrap(), 1);
        assert_eq!(store.identity_keys("baidu").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("poi.db");
        let store = PoiStore::open(&path).await.unwrap();
        run_migrations(store.pool()).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }
}
