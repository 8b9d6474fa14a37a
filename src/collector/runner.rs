use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointKey, CheckpointStore, Status};
use crate::config::ProviderConfig;
use crate::credentials::CredentialPool;
use crate::limiter::RateLimiter;
use crate::metrics::{METRICS, bump};
use crate::providers::adapter::{ParseContext, ProviderAdapter};
use crate::region::{Region, RegionSource};
use crate::schema::Poi;
use crate::store::PoiSink;

use super::enumerator::WorkEnumerator;
use super::executor::{HttpTransport, Outcome, RequestExecutor};

/// Services shared by every provider collection.
///
/// All members are cheap handles; cloning shares the underlying
/// pools and stores.
#[derive(Clone)]
pub struct PipelineContext {
    pub sink: Arc<dyn PoiSink>,
    pub credentials: CredentialPool,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub region: Arc<dyn RegionSource>,
}

/// One (provider, strategy) collection run.
///
/// A job is strictly sequential: one request in flight, pages in
/// order, units in enumeration order. Parallelism only exists across
/// providers, one job per provider task.
///
/// CHECKPOINT WRITES:
/// - once at start (status running, cursor on the first open unit)
/// - after every page that has a successor (cursor on the next page)
/// - after every finished unit (cursor on the next unit, page 1)
/// - on every terminal transition (paused, completed, error)
///
/// STOPPING:
/// - The stop flag is polled before every page; an in-flight request
///   always completes and is persisted first
pub struct CollectionJob {
    adapter: Arc<dyn ProviderAdapter>,
    settings: ProviderConfig,
    executor: RequestExecutor,
    ctx: PipelineContext,
    stop: Arc<AtomicBool>,
}

impl CollectionJob {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        settings: ProviderConfig,
        ctx: PipelineContext,
        transport: Arc<dyn HttpTransport>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            settings.rate.requests_per_second,
            settings.rate.burst,
        ));
        let executor = RequestExecutor::new(
            adapter.clone(),
            transport,
            limiter,
            ctx.credentials.clone(),
            settings.retry,
        );
        Self {
            adapter,
            settings,
            executor,
            ctx,
            stop,
        }
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey::new(self.adapter.name(), self.settings.strategy.name())
    }

    /// Runs the collection to a resting state and returns the final
    /// checkpoint (paused, completed or error).
    ///
    /// Never panics on provider or storage failures: they end the run
    /// with status `error` and a message.
    pub async fn run(mut self) -> Checkpoint {
        let key = self.key();
        METRICS.collections_active.fetch_add(1, Ordering::Relaxed);

        let (mut checkpoint, region) = match self.prepare(&key).await {
            Ok(prepared) => prepared,
            Err(e) => {
                // a checkpoint that cannot be read is left untouched on disk
                error!("[{}] cannot prepare collection: {:#}", key.provider, e);
                METRICS.collections_active.fetch_sub(1, Ordering::Relaxed);
                let mut cp = Checkpoint::new(&key);
                cp.status = Status::Error;
                cp.error_message = Some(format!("{:#}", e));
                return cp;
            }
        };

        if let Err(e) = self.drive(&mut checkpoint, region).await {
            error!("[{}] collection failed: {:#}", key.provider, e);
            checkpoint.status = Status::Error;
            checkpoint.error_message = Some(format!("{:#}", e));
            if let Err(e) = self.save(&mut checkpoint).await {
                error!("[{}] failed to record error state: {:#}", key.provider, e);
            }
        }

        METRICS.collections_active.fetch_sub(1, Ordering::Relaxed);
        checkpoint
    }

    /// Reads the region and loads the checkpoint to continue from, or
    /// starts fresh.
    ///
    /// A stored checkpoint is only resumed when its scope matches the
    /// current region and sweep; unit ids from another scope would mark
    /// units of this one as done.
    async fn prepare(&self, key: &CheckpointKey) -> Result<(Checkpoint, Region)> {
        let region = self.ctx.region.current().await.context("failed to read region")?;
        let scope = WorkEnumerator::scope(&self.settings.strategy, &region);

        let existing = if self.settings.resume {
            self.ctx.checkpoints.load(key).await?
        } else {
            None
        };

        let mut checkpoint = match existing {
            Some(cp) if cp.status == Status::Completed => {
                info!("[{}] previous {} collection completed, starting fresh", key.provider, key.strategy);
                Checkpoint::new(key)
            }
            Some(cp) if cp.scope.as_deref() != Some(scope.as_str()) => {
                warn!(
                    "[{}] {} checkpoint was taken for {}, now collecting {}; starting fresh",
                    key.provider,
                    key.strategy,
                    cp.scope.as_deref().unwrap_or("an unknown scope"),
                    scope
                );
                Checkpoint::new(key)
            }
            Some(cp) => {
                info!(
                    "[{}] resuming {} collection ({} units done, {} saved, was {})",
                    key.provider,
                    key.strategy,
                    cp.completed_units.len(),
                    cp.total_saved,
                    cp.status.as_str()
                );
                cp
            }
            None => Checkpoint::new(key),
        };
        checkpoint.scope = Some(scope);
        Ok((checkpoint, region))
    }

    async fn drive(&mut self, checkpoint: &mut Checkpoint, region: Region) -> Result<()> {
        let provider = self.adapter.name();
        let enumerator = WorkEnumerator::new(&self.settings.strategy, self.adapter.as_ref(), &region)?;
        let units = enumerator.units();

        checkpoint.status = Status::Running;
        checkpoint.error_message = None;
        checkpoint.started_at.get_or_insert_with(Utc::now);

        let Some((mut index, mut page)) = enumerator.resume_point(checkpoint) else {
            return self.finish(checkpoint).await;
        };
        checkpoint.current_unit = Some(units[index].id());
        checkpoint.current_page = page;
        self.save(checkpoint).await?;

        info!(
            "[{}] {} collection: {} units, starting at #{} page {}",
            provider,
            self.settings.strategy.name(),
            units.len(),
            index + 1,
            page
        );

        while let Some(unit) = units.get(index) {
            let unit_id = unit.id();
            if checkpoint.is_completed(&unit_id) {
                index += 1;
                page = 1;
                continue;
            }

            // region may be edited while a long collection runs
            let region = self.ctx.region.current().await.context("failed to read region")?;
            info!("[{}] ({}/{}) {}", provider, index + 1, units.len(), unit);

            loop {
                if self.stop.load(Ordering::SeqCst) {
                    checkpoint.status = Status::Paused;
                    checkpoint.current_unit = Some(unit_id.clone());
                    checkpoint.current_page = page;
                    self.save(checkpoint).await?;
                    info!("[{}] stopped at {} page {}", provider, unit, page);
                    return Ok(());
                }

                let spec = self.adapter.build_request(unit, page, &region);
                match self.executor.execute(&spec).await? {
                    Outcome::Data(payload) => {
                        bump(&METRICS.pages_fetched);
                        let ctx = ParseContext {
                            unit,
                            page,
                            bounds: &region.bounds,
                        };
                        let parsed = self.adapter.parse(&payload, &ctx);
                        let inserted = self.persist(&parsed.pois).await?;
                        checkpoint.total_saved += inserted;
                        METRICS
                            .pois_dropped
                            .fetch_add(parsed.dropped.len(), Ordering::Relaxed);

                        info!(
                            "[{}]   page {}: {} returned, {} kept, {} new",
                            provider,
                            page,
                            parsed.raw_count,
                            parsed.pois.len(),
                            inserted
                        );

                        if !parsed.has_more {
                            break;
                        }
                        page += 1;
                        checkpoint.current_unit = Some(unit_id.clone());
                        checkpoint.current_page = page;
                        self.save(checkpoint).await?;
                    }

                    Outcome::Empty => break,

                    Outcome::Fatal(reason) => {
                        warn!("[{}] abandoning {} at page {}: {}", provider, unit, page, reason);
                        break;
                    }

                    Outcome::QuotaFailure { credential_id } => {
                        let message = match credential_id {
                            Some(id) => format!(
                                "quota exhausted: credential {} was the last usable {} credential",
                                id, provider
                            ),
                            None => format!("no usable {} credential", provider),
                        };
                        warn!("[{}] pausing at {} page {}: {}", provider, unit, page, message);
                        checkpoint.status = Status::Paused;
                        checkpoint.current_unit = Some(unit_id.clone());
                        checkpoint.current_page = page;
                        checkpoint.error_message = Some(message);
                        self.save(checkpoint).await?;
                        return Ok(());
                    }
                }
            }

            let next = units.get(index + 1).map(|u| u.id());
            checkpoint.complete_unit(&unit_id, next.as_deref());
            self.save(checkpoint).await?;

            index += 1;
            page = 1;
        }

        self.finish(checkpoint).await
    }

    async fn finish(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.status = Status::Completed;
        checkpoint.current_unit = None;
        checkpoint.current_page = 1;
        self.save(checkpoint).await?;
        info!(
            "[{}] {} collection completed: {} new records",
            checkpoint.provider, checkpoint.strategy, checkpoint.total_saved
        );
        Ok(())
    }

    /// Upserts a page in order. Returns the number of new rows.
    async fn persist(&self, pois: &[Poi]) -> Result<u64> {
        let mut inserted = 0;
        for poi in pois {
            if self.ctx.sink.upsert(poi).await? {
                inserted += 1;
                bump(&METRICS.pois_inserted);
            } else {
                debug!("[{}] duplicate: {}", poi.platform, poi.name);
                bump(&METRICS.pois_duplicate);
            }
        }
        Ok(inserted)
    }

    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.updated_at = Some(Utc::now());
        self.ctx
            .checkpoints
            .save(checkpoint)
            .await
            .context("failed to save checkpoint")
    }
}
