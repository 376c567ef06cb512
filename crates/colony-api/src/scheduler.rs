//! Background tick loop with a Stopped/Running state machine.
//!
//! A stop request is honoured up to the moment a tick takes the engine lock.
//! After that the tick runs to completion (including its save or rollback)
//! before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use contracts::SchedulerState;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::ColonyEngine;

#[derive(Debug)]
pub struct TickScheduler {
    interval: Duration,
    stop_tx: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop_tx: None,
            worker: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
        {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Stopped -> Running. Returns `false` when the loop was already running.
    /// Must be called from inside a tokio runtime.
    pub fn start(&mut self, engine: Arc<Mutex<ColonyEngine>>) -> bool {
        if self.state() == SchedulerState::Running {
            return false;
        }
        self.stop_tx = None;
        self.worker = None;

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(run_loop(engine, self.interval, stop_rx));
        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            "tick scheduler started"
        );
        true
    }

    /// Running -> Stopped. Waits for a tick in progress to finish; no tick
    /// starts after this returns. Returns `false` when nothing was running.
    pub async fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        match worker.await {
            Ok(()) => info!("tick scheduler stopped"),
            Err(err) => error!(%err, "tick scheduler task ended abnormally"),
        }
        true
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

async fn run_loop(
    engine: Arc<Mutex<ColonyEngine>>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if *stop_rx.borrow() {
                    break;
                }
                let mut core = engine.lock().await;
                // A stop may have arrived while a request held the lock.
                if *stop_rx.borrow() {
                    break;
                }
                if let Err(err) = core.tick().await {
                    debug!(%err, "scheduled tick not committed; retrying next interval");
                }
            }
        }
    }
}
