//! Credential pool.
//!
//! Holds any number of API keys per provider in SQLite. The pipeline
//! leases the least-recently-used usable key and, when a provider
//! reports quota exhaustion, marks that key and rotates to the next one.
//! Exhaustion is sticky until an operator resets it.

use anyhow::{Result, bail};
use log::{info, warn};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::util::now_ms;

/// One API key as stored in the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Credential {
    pub id: i64,
    pub provider: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub name: String,
    pub active: bool,
    pub quota_exhausted: bool,
    /// Milliseconds since Unix epoch
    pub last_used_at: Option<i64>,
}

/// A credential handed to a running collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    pub secret: String,
}

/// SQLite-backed credential pool shared by all collections.
///
/// Cheap to clone (wraps the connection pool).
#[derive(Clone)]
pub struct CredentialPool {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str =
    "SELECT id, platform, api_key, name, is_active, quota_exhausted, last_used_at FROM api_keys";

impl CredentialPool {
    /// Expects the schema created by [`crate::store::run_migrations`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // --------------------------------------------------------
    // Pipeline operations
    // --------------------------------------------------------

    /// Leases the least-recently-used active, non-exhausted credential.
    ///
    /// Never-used keys come first, then oldest `last_used_at`, then id.
    pub async fn current(&self, provider: &str) -> Result<Option<Lease>> {
        let row = sqlx::query(
            r#"
            SELECT id, api_key FROM api_keys
            WHERE platform = ? AND is_active = 1 AND quota_exhausted = 0
            ORDER BY last_used_at IS NOT NULL, last_used_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let lease = Lease {
            id: row.try_get("id")?,
            secret: row.try_get("api_key")?,
        };
        self.touch(lease.id).await?;
        Ok(Some(lease))
    }

    /// Marks `exhausted_id` as quota-exhausted, then leases the next
    /// usable credential of `provider`, if any.
    pub async fn rotate(&self, provider: &str, exhausted_id: i64) -> Result<Option<Lease>> {
        self.mark_exhausted(exhausted_id).await?;

        let next = self.current(provider).await?;
        match &next {
            Some(lease) => info!(
                "[{}] credential {} exhausted, switched to credential {}",
                provider, exhausted_id, lease.id
            ),
            None => warn!(
                "[{}] credential {} exhausted, no usable credential left",
                provider, exhausted_id
            ),
        }
        Ok(next)
    }

    /// Stamps `last_used_at`.
    pub async fn touch(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_exhausted(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE api_keys SET quota_exhausted = 1, updated_at = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --------------------------------------------------------
    // Management operations
    // --------------------------------------------------------

    /// Adds a credential and returns its id.
    pub async fn add(&self, provider: &str, secret: &str, name: &str) -> Result<i64> {
        if secret.trim().is_empty() {
            bail!("credential secret must not be empty");
        }
        let now = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO api_keys (platform, api_key, name, is_active, quota_exhausted, created_at, updated_at)
            VALUES (?, ?, ?, 1, 0, ?, ?)
            "#,
        )
        .bind(provider)
        .bind(secret.trim())
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Inserts a credential only if the same (provider, secret) pair is
    /// not stored yet. Returns `true` when a row was added.
    pub async fn seed(&self, provider: &str, secret: &str, name: &str) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO api_keys (platform, api_key, name, is_active, quota_exhausted, created_at, updated_at)
            VALUES (?, ?, ?, 1, 0, ?, ?)
            ON CONFLICT(platform, api_key) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(secret.trim())
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Credential>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_credential).transpose()
    }

    /// All credentials of a provider in creation order.
    pub async fn list(&self, provider: &str) -> Result<Vec<Credential>> {
        let rows = sqlx::query(&format!("{} WHERE platform = ? ORDER BY id ASC", SELECT_COLUMNS))
            .bind(provider)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_credential).collect()
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE api_keys SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn deactivate(&self, id: i64) -> Result<()> {
        self.set_active(id, false).await
    }

    /// Clears the exhausted flag of one credential.
    pub async fn reset_quota(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE api_keys SET quota_exhausted = 0, updated_at = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clears the exhausted flag of every credential of `provider`, or of
    /// all providers. Returns the number of credentials reset.
    pub async fn reset_all_quotas(&self, provider: Option<&str>) -> Result<u64> {
        let result = match provider {
            Some(p) => {
                sqlx::query(
                    "UPDATE api_keys SET quota_exhausted = 0, updated_at = ? \
                     WHERE platform = ? AND quota_exhausted = 1",
                )
                .bind(now_ms())
                .bind(p)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE api_keys SET quota_exhausted = 0, updated_at = ? WHERE quota_exhausted = 1",
                )
                .bind(now_ms())
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_credential(row: &SqliteRow) -> Result<Credential> {
    Ok(Credential {
        id: row.try_get("id")?,
        provider: row.try_get("platform")?,
        secret: row.try_get("api_key")?,
        name: row.try_get("name")?,
        active: row.try_get("is_active")?,
        quota_exhausted: row.try_get("quota_exhausted")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}
