//! Collection checkpoints.
//!
//! A checkpoint is the durable cursor of one (provider, strategy)
//! collection: lifecycle status, the unit and page in progress, the
//! units already finished and cumulative counters. It is written after
//! every page, so a crash re-fetches at most one page.
//!
//! Two interchangeable backends implement [`CheckpointStore`]:
//! - [`FileCheckpointStore`]: one JSON document per collection
//! - [`RedisCheckpointStore`]: one Redis string per collection

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

// ------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------
//
//   idle → running → { paused, completed, error }
//   paused → running        (resume)
//   error  → running / idle (operator action)
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

/// Identifies one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub provider: String,
    pub strategy: String,
}

impl CheckpointKey {
    pub fn new(provider: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            strategy: strategy.into(),
        }
    }

    /// File/key stem, e.g. `progress_amap_keywords`.
    pub fn stem(&self) -> String {
        format!("progress_{}_{}", self.provider, self.strategy)
    }
}

/// Durable cursor of one collection.
///
/// Unknown fields are ignored and missing fields take defaults, so
/// documents written by other versions still load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub provider: String,
    pub strategy: String,
    pub status: Status,

    /// Id of the work unit in progress
    pub current_unit: Option<String>,

    /// Next page to fetch within `current_unit` (1-based)
    pub current_page: u32,

    /// Ids of fully processed units
    pub completed_units: Vec<String>,

    /// Newly inserted records over the whole collection
    pub total_saved: u64,

    /// Region and sweep parameters the unit ids were enumerated for.
    /// Unit ids only mean something within the same scope.
    pub scope: Option<String>,

    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// A fresh idle checkpoint positioned before the first unit.
    pub fn new(key: &CheckpointKey) -> Self {
        Self {
            provider: key.provider.clone(),
            strategy: key.strategy.clone(),
            current_page: 1,
            ..Default::default()
        }
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey::new(&self.provider, &self.strategy)
    }

    pub fn is_completed(&self, unit_id: &str) -> bool {
        self.completed_units.iter().any(|u| u == unit_id)
    }

    /// Records `unit_id` as done and moves the cursor to `next`.
    pub fn complete_unit(&mut self, unit_id: &str, next: Option<&str>) {
        if !self.is_completed(unit_id) {
            self.completed_units.push(unit_id.to_string());
        }
        self.current_unit = next.map(str::to_string);
        self.current_page = 1;
    }
}

/// Durable checkpoint read/write contract.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>>;

    /// Persists `checkpoint`, stamping nothing; callers own timestamps.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Removes the stored checkpoint (operator reset to idle).
    async fn clear(&self, key: &CheckpointKey) -> Result<()>;
}

// ------------------------------------------------------------
// File backend
// ------------------------------------------------------------
//
// UTF-8 JSON, one pretty-printed document per collection.
// Writes go to a temp file first and are renamed into place so a
// crash never leaves a truncated document behind.
//
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.stem()))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>> {
        let path = self.path_for(key);
        let Some(data) = read_optional(&path).await? else {
            return Ok(None);
        };
        let cp = serde_json::from_str(&data)
            .with_context(|| format!("corrupt checkpoint {}", path.display()))?;
        Ok(Some(cp))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.path_for(&checkpoint.key());
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(checkpoint)?;
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(&data).await?;
            // contents must be on disk before the rename makes them visible
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn clear(&self, key: &CheckpointKey) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ------------------------------------------------------------
// Redis backend
// ------------------------------------------------------------
//
// One string key per collection: `{prefix}:{provider}:{strategy}`.
// A fresh multiplexed connection is opened per operation; there is
// no long-held connection state to recover after a Redis restart.
//
#[derive(Clone)]
pub struct RedisCheckpointStore {
    client: redis::Client,
    prefix: String,
}

impl RedisCheckpointStore {
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("invalid redis url {}", url))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    pub fn key_for(&self, key: &CheckpointKey) -> String {
        format!("{}:{}:{}", self.prefix, key.provider, key.strategy)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn load(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = redis::cmd("GET")
            .arg(self.key_for(key))
            .query_async(&mut conn)
            .await?;
        data.map(|d| serde_json::from_str(&d).context("corrupt checkpoint in redis"))
            .transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(checkpoint)?;
        redis::cmd("SET")
            .arg(self.key_for(&checkpoint.key()))
            .arg(data)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self, key: &CheckpointKey) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(self.key_for(key))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
