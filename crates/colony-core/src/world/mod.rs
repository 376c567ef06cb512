//! ColonyWorld: one world's ledger, catalog, queue, completed set and alerts,
//! advanced one tick at a time.
//!
//! The world is plain owned data with no interior locking. Whoever holds
//! `&mut ColonyWorld` has exclusive access, so a tick or an admission is
//! atomic from the point of view of every other caller that goes through
//! the same owner. Cloning is cheap enough to take a pre-operation copy for
//! rollback.

use std::collections::BTreeSet;
use std::fmt;

use contracts::{
    EngineConfig, ResourceAmounts, SchedulerState, StateView, TaskDefinition, TaskInstance,
    WorldSnapshot, SCHEMA_VERSION_V1,
};
use tracing::{debug, info, warn};

use crate::alerts::{low_resource_message, task_failed_message, AlertSink};
use crate::catalog::TaskCatalog;
use crate::failure::FailurePolicy;
use crate::ledger::ResourceLedger;
use crate::queue::{AdmissionError, AdmissionRequest, TaskQueue};

mod commands;
mod init;
mod snapshot;
mod step;

#[derive(Debug, Clone)]
pub struct ColonyWorld {
    catalog: TaskCatalog,
    ledger: ResourceLedger,
    queue: TaskQueue,
    completed: BTreeSet<String>,
    alerts: AlertSink,
    failures: FailurePolicy,
    low_resource_threshold: u64,
    tick: u64,
    baseline: ResourceAmounts,
}

/// What one tick did, for logging and callers that want to react.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub completed: Vec<TaskInstance>,
    pub failed: Vec<TaskInstance>,
    pub first_completions: Vec<String>,
    pub raised_alerts: Vec<String>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty() && self.raised_alerts.is_empty()
    }
}

/// A persisted world that does not fit the catalog it is being loaded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    SchemaVersion { found: String, expected: String },
    UnknownActiveTask { instance_id: u64, task_name: String },
    UnknownCompletedTask(String),
    DuplicateInstance(u64),
    InstanceIdOutOfRange { instance_id: u64, next_instance_id: u64 },
    ZeroRemaining(u64),
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaVersion { found, expected } => write!(
                f,
                "snapshot schema_version={found} expected={expected}"
            ),
            Self::UnknownActiveTask {
                instance_id,
                task_name,
            } => write!(
                f,
                "active instance #{instance_id} refers to unknown task {task_name:?}"
            ),
            Self::UnknownCompletedTask(name) => {
                write!(f, "completed set names unknown task {name:?}")
            }
            Self::DuplicateInstance(id) => write!(f, "instance #{id} appears more than once"),
            Self::InstanceIdOutOfRange {
                instance_id,
                next_instance_id,
            } => write!(
                f,
                "instance #{instance_id} is not below next_instance_id={next_instance_id}"
            ),
            Self::ZeroRemaining(id) => write!(f, "instance #{id} has no ticks remaining"),
        }
    }
}

impl std::error::Error for WorldError {}

impl ColonyWorld {
    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn alerts(&self) -> &AlertSink {
        &self.alerts
    }

    pub fn completed_tasks(&self) -> &BTreeSet<String> {
        &self.completed
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn low_resource_threshold(&self) -> u64 {
        self.low_resource_threshold
    }

    /// Balances this world started from, either the config seed or the loaded snapshot.
    pub fn baseline(&self) -> &ResourceAmounts {
        &self.baseline
    }
}
