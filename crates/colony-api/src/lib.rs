//! Engine facade over one colony world: serialized access, a background tick
//! scheduler, and a durable store with rollback when a save fails.

pub mod config;
mod error;
pub mod persistence;
pub mod scheduler;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use colony_core::{AdmissionRequest, TickReport};
use colony_core::{ColonyWorld, TaskCatalog};
use contracts::{EngineConfig, SchedulerState, StateView, TaskDefinition, WorldSnapshot};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use config::{load_config, ColonyPaths, ConfigError};
pub use error::EngineError;
use persistence::{run_bounded, spawn_store_job, timed_out, wait_bounded, StoreJob};
pub use persistence::{
    open_store, JsonFileWorldStore, MemoryWorldStore, PersistenceError, SqliteWorldStore,
    WorldStore,
};
pub use scheduler::TickScheduler;

/// One world plus its store. Every mutation is saved before it counts; a
/// failed or timed-out save puts the world back exactly as it was.
///
/// A save that times out cannot be cancelled. The engine queues a write of
/// the rolled-back world behind it, and no later save starts until that
/// write has finished, so the store ends up holding the world the engine
/// kept.
pub struct ColonyEngine {
    world: ColonyWorld,
    store: Arc<dyn WorldStore>,
    persistence_timeout: Duration,
    last_persistence_error: Option<String>,
    /// Set while the store may hold a world the engine rolled back.
    diverged: bool,
    reconcile: Option<StoreJob<()>>,
}

impl fmt::Debug for ColonyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColonyEngine")
            .field("world", &self.world)
            .field("persistence_timeout", &self.persistence_timeout)
            .field("last_persistence_error", &self.last_persistence_error)
            .field("diverged", &self.diverged)
            .finish_non_exhaustive()
    }
}

impl ColonyEngine {
    /// Loads the stored world, or starts a fresh one from `config` and saves it.
    pub async fn open(config: &EngineConfig, store: Arc<dyn WorldStore>) -> Result<Self, EngineError> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(EngineError::Config(problems));
        }

        let catalog = if config.tasks.is_empty() {
            TaskCatalog::default_catalog()
        } else {
            TaskCatalog::from_definitions(config.tasks.clone())?
        };
        let persistence_timeout = Duration::from_millis(config.persistence_timeout_ms);

        let loader = Arc::clone(&store);
        let stored = run_bounded(persistence_timeout, move || loader.load_world()).await?;

        match stored {
            Some(snapshot) => {
                let world = ColonyWorld::from_snapshot(config, catalog, snapshot)?;
                info!(
                    tick = world.current_tick(),
                    active_tasks = world.queue().len(),
                    "restored colony world"
                );
                Ok(Self {
                    world,
                    store,
                    persistence_timeout,
                    last_persistence_error: None,
                    diverged: false,
                    reconcile: None,
                })
            }
            None => {
                let engine = Self {
                    world: ColonyWorld::new(config, catalog),
                    store,
                    persistence_timeout,
                    last_persistence_error: None,
                    diverged: false,
                    reconcile: None,
                };
                let store = Arc::clone(&engine.store);
                let snapshot = engine.world.snapshot();
                run_bounded(persistence_timeout, move || store.save_world(&snapshot)).await?;
                info!(
                    tasks = engine.world.catalog().len(),
                    "started fresh colony world"
                );
                Ok(engine)
            }
        }
    }

    pub fn world(&self) -> &ColonyWorld {
        &self.world
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub async fn assign_task(&mut self, request: AdmissionRequest) -> Result<u64, EngineError> {
        let before = self.world.clone();
        let instance_id = self.world.assign_task(request)?;
        self.commit(before, "assign_task").await?;
        Ok(instance_id)
    }

    /// One full tick cycle followed by a save.
    pub async fn tick(&mut self) -> Result<TickReport, EngineError> {
        let before = self.world.clone();
        let report = self.world.tick();
        self.commit(before, "tick").await?;

        if report.is_quiet() {
            return Ok(report);
        }
        debug!(
            tick = report.tick,
            completed = report.completed.len(),
            failed = report.failed.len(),
            alerts = report.raised_alerts.len(),
            "tick committed"
        );
        Ok(report)
    }

    pub async fn clear_alerts(&mut self) -> Result<(), EngineError> {
        if self.world.alerts().is_empty() {
            return Ok(());
        }
        let before = self.world.clone();
        self.world.clear_alerts();
        self.commit(before, "clear_alerts").await
    }

    pub async fn drain_alerts(&mut self) -> Result<Vec<String>, EngineError> {
        if self.world.alerts().is_empty() {
            return Ok(Vec::new());
        }
        let before = self.world.clone();
        let drained = self.world.drain_alerts();
        self.commit(before, "drain_alerts").await?;
        Ok(drained)
    }

    /// Waits for the store to catch up with a save the engine stopped
    /// waiting for. Fails with `Timeout` when it is still running.
    pub async fn settle(&mut self) -> Result<(), PersistenceError> {
        let Some(job) = self.reconcile.as_mut() else {
            return Ok(());
        };
        let Some(outcome) = wait_bounded(self.persistence_timeout, job).await else {
            return Err(timed_out(self.persistence_timeout));
        };
        self.reconcile = None;

        match outcome {
            Ok(()) => {
                self.diverged = false;
                debug!(tick = self.world.current_tick(), "store reconciled with rolled-back world");
            }
            Err(err) => warn!(%err, "failed to reconcile store; next save overwrites it"),
        }
        Ok(())
    }

    async fn commit(&mut self, before: ColonyWorld, operation: &'static str) -> Result<(), EngineError> {
        let saved = match self.settle().await {
            Ok(()) => self.save(&before).await,
            Err(err) => Err(err),
        };

        match saved {
            Ok(()) => {
                self.last_persistence_error = None;
                Ok(())
            }
            Err(err) => {
                warn!(
                    operation,
                    tick = before.current_tick(),
                    %err,
                    "save failed; world rolled back"
                );
                self.world = before;
                self.last_persistence_error = Some(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Saves the current world. `durable` is what the store should hold if
    /// this save does not go through.
    async fn save(&mut self, durable: &ColonyWorld) -> Result<(), PersistenceError> {
        let store = Arc::clone(&self.store);
        let snapshot = self.world.snapshot();
        let mut job = spawn_store_job(move || store.save_world(&snapshot));

        match wait_bounded(self.persistence_timeout, &mut job).await {
            Some(Ok(())) => {
                self.diverged = false;
                Ok(())
            }
            Some(Err(err)) => {
                if self.diverged {
                    self.queue_reconcile(None, durable.snapshot());
                }
                Err(err)
            }
            None => {
                self.diverged = true;
                self.queue_reconcile(Some(job), durable.snapshot());
                Err(timed_out(self.persistence_timeout))
            }
        }
    }

    fn queue_reconcile(&mut self, behind: Option<StoreJob<()>>, durable: WorldSnapshot) {
        let store = Arc::clone(&self.store);
        self.reconcile = Some(tokio::spawn(async move {
            if let Some(job) = behind {
                // Its outcome is overwritten either way.
                let _ = job.await;
            }
            match tokio::task::spawn_blocking(move || store.save_world(&durable)).await {
                Ok(result) => result,
                Err(err) => Err(PersistenceError::Join(err.to_string())),
            }
        }));
    }
}

/// Cloneable handle shared by request handlers and the tick loop. All world
/// access goes through one lock, so ticks and requests are totally ordered.
#[derive(Debug, Clone)]
pub struct Engine {
    core: Arc<Mutex<ColonyEngine>>,
    scheduler: Arc<Mutex<TickScheduler>>,
}

impl Engine {
    pub async fn open(config: EngineConfig, store: Arc<dyn WorldStore>) -> Result<Self, EngineError> {
        let interval = Duration::try_from_secs_f64(config.tick_interval_secs).map_err(|err| {
            EngineError::Config(vec![format!(
                "tick_interval_secs={} is not a usable interval: {err}",
                config.tick_interval_secs
            )])
        })?;
        let core = ColonyEngine::open(&config, store).await?;

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            scheduler: Arc::new(Mutex::new(TickScheduler::new(interval))),
        })
    }

    pub async fn assign_task(&self, request: AdmissionRequest) -> Result<u64, EngineError> {
        self.core.lock().await.assign_task(request).await
    }

    /// Consistent view of the world between two ticks.
    pub async fn query_state(&self) -> StateView {
        let scheduler = self.scheduler_state().await;
        self.core.lock().await.world().state_view(scheduler)
    }

    pub async fn clear_alerts(&self) -> Result<(), EngineError> {
        self.core.lock().await.clear_alerts().await
    }

    pub async fn drain_alerts(&self) -> Result<Vec<String>, EngineError> {
        self.core.lock().await.drain_alerts().await
    }

    /// Runs one tick now, independent of the scheduler.
    pub async fn tick_once(&self) -> Result<TickReport, EngineError> {
        self.core.lock().await.tick().await
    }

    pub async fn available_tasks(&self) -> Vec<TaskDefinition> {
        self.core.lock().await.world().available_tasks()
    }

    pub async fn catalog(&self) -> Vec<TaskDefinition> {
        self.core.lock().await.world().catalog().definitions().to_vec()
    }

    pub async fn start_scheduler(&self) -> bool {
        self.scheduler.lock().await.start(Arc::clone(&self.core))
    }

    pub async fn stop_scheduler(&self) -> bool {
        self.scheduler.lock().await.stop().await
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.lock().await.state()
    }

    /// Waits, up to the persistence timeout, for the store to hold the world
    /// a timed-out save was rolled back to.
    pub async fn settle(&self) -> Result<(), EngineError> {
        Ok(self.core.lock().await.settle().await?)
    }

    pub async fn last_persistence_error(&self) -> Option<String> {
        self.core
            .lock()
            .await
            .last_persistence_error()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests;
