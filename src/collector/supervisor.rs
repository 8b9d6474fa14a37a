use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use futures_util::future::join_all;
use log::{error, info};
use tokio::task::JoinHandle;

use crate::checkpoint::{Checkpoint, CheckpointKey};
use crate::config::ProviderConfig;
use crate::providers::get_adapter;

use super::executor::HttpTransport;
use super::runner::{CollectionJob, PipelineContext};

struct RunningCollection {
    key: CheckpointKey,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Checkpoint>,
}

/// Owns one collection task per provider.
///
/// DESIGN:
/// - A provider runs at most one collection at a time
/// - Stopping is cooperative: the flag is observed at the next page
///   boundary and the task then saves a `paused` checkpoint
/// - Tasks are isolated; one provider failing never touches another
pub struct CollectorHub {
    ctx: PipelineContext,
    tasks: HashMap<String, RunningCollection>,
}

impl CollectorHub {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            tasks: HashMap::new(),
        }
    }

    /// Spawns the collection described by `settings`.
    pub fn start(&mut self, settings: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Result<()> {
        let Some(adapter) = get_adapter(&settings.name) else {
            bail!("provider '{}' is not supported", settings.name);
        };
        if self.is_running(&settings.name) {
            bail!("provider '{}' is already collecting", settings.name);
        }

        let name = settings.name.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let job = CollectionJob::new(adapter, settings, self.ctx.clone(), transport, stop.clone());
        let key = job.key();

        info!("[{}] starting {} collection", name, key.strategy);
        let handle = tokio::spawn(job.run());
        self.tasks.insert(name, RunningCollection { key, stop, handle });
        Ok(())
    }

    /// Requests a cooperative stop. Returns `false` if nothing is running.
    pub fn stop(&self, provider: &str) -> bool {
        match self.tasks.get(provider) {
            Some(task) if !task.handle.is_finished() => {
                task.stop.store(true, Ordering::SeqCst);
                info!("[{}] stop requested", provider);
                true
            }
            _ => false,
        }
    }

    pub fn stop_all(&self) {
        for provider in self.tasks.keys() {
            self.stop(provider);
        }
    }

    /// Stop flags of all tasks, for signal handlers that outlive a
    /// borrow of the hub.
    pub fn stop_flags(&self) -> Vec<Arc<AtomicBool>> {
        self.tasks.values().map(|t| t.stop.clone()).collect()
    }

    pub fn is_running(&self, provider: &str) -> bool {
        self.tasks
            .get(provider)
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Providers with a task, finished or not.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Last persisted checkpoint of the provider's collection.
    pub async fn status(&self, provider: &str) -> Result<Option<Checkpoint>> {
        let Some(task) = self.tasks.get(provider) else {
            return Ok(None);
        };
        self.ctx.checkpoints.load(&task.key).await
    }

    /// Operator reset: forgets a collection's checkpoint so the next
    /// start begins from scratch.
    pub async fn reset(&self, key: &CheckpointKey) -> Result<()> {
        if self.is_running(&key.provider) {
            bail!("provider '{}' is collecting; stop it first", key.provider);
        }
        self.ctx.checkpoints.clear(key).await?;
        info!("[{}] {} checkpoint reset", key.provider, key.strategy);
        Ok(())
    }

    /// Waits for one provider's task and returns its final checkpoint.
    pub async fn join(&mut self, provider: &str) -> Option<Checkpoint> {
        let task = self.tasks.remove(provider)?;
        match task.handle.await {
            Ok(cp) => Some(cp),
            Err(e) => {
                error!("[{}] collection task aborted: {}", provider, e);
                None
            }
        }
    }

    /// Waits for every task. Finished collections are removed.
    pub async fn join_all(&mut self) -> Vec<(String, Checkpoint)> {
        let tasks: Vec<(String, RunningCollection)> = self.tasks.drain().collect();
        let names: Vec<String> = tasks.iter().map(|(n, _)| n.clone()).collect();
        let results = join_all(tasks.into_iter().map(|(_, t)| t.handle)).await;

        names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| match result {
                Ok(cp) => Some((name, cp)),
                Err(e) => {
                    error!("[{}] collection task aborted: {}", name, e);
                    None
                }
            })
            .collect()
    }
}
