//! In-flight task instances and the admission rules that create them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use contracts::TaskInstance;
use tracing::debug;

use crate::catalog::TaskCatalog;
use crate::failure::FailurePolicy;
use crate::ledger::{LedgerError, ResourceLedger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub task_name: String,
    pub placement: String,
    pub duration_override: Option<u64>,
}

impl AdmissionRequest {
    pub fn new(task_name: impl Into<String>, placement: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            placement: placement.into(),
            duration_override: None,
        }
    }

    pub fn with_duration(mut self, ticks: u64) -> Self {
        self.duration_override = Some(ticks);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    UnknownTask {
        name: String,
    },
    PrerequisiteUnmet {
        task: String,
        prerequisite: String,
    },
    InsufficientResources {
        resource: String,
        required: u64,
        available: u64,
    },
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTask { name } => write!(f, "unknown task {name:?}"),
            Self::PrerequisiteUnmet { task, prerequisite } => write!(
                f,
                "task {task:?} requires {prerequisite:?} to have completed first"
            ),
            Self::InsufficientResources {
                resource,
                required,
                available,
            } => write!(
                f,
                "not enough {resource} to start task: required={required} available={available}"
            ),
        }
    }
}

impl std::error::Error for AdmissionError {}

impl From<LedgerError> for AdmissionError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientResource {
                name,
                required,
                available,
            } => Self::InsufficientResources {
                resource: name,
                required,
                available,
            },
        }
    }
}

/// Instances removed from the queue by one call to [`TaskQueue::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueTick {
    pub completed: Vec<TaskInstance>,
    pub failed: Vec<TaskInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueue {
    instances: BTreeMap<u64, TaskInstance>,
    next_instance_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            instances: BTreeMap::new(),
            next_instance_id: 1,
        }
    }

    /// Rebuild a queue from persisted instances. Callers validate the input first.
    pub fn restore(instances: Vec<TaskInstance>, next_instance_id: u64) -> Self {
        let instances = instances
            .into_iter()
            .map(|instance| (instance.instance_id, instance))
            .collect::<BTreeMap<_, _>>();
        let floor = instances
            .keys()
            .next_back()
            .map(|id| id.saturating_add(1))
            .unwrap_or(1);
        Self {
            instances,
            next_instance_id: next_instance_id.max(floor),
        }
    }

    /// Validate and fund a new instance. Catalog lookup and prerequisite
    /// checks run before the ledger is touched, and the ledger debit is
    /// all-or-nothing, so a rejected request leaves no trace.
    pub fn admit(
        &mut self,
        request: AdmissionRequest,
        catalog: &TaskCatalog,
        ledger: &mut ResourceLedger,
        completed: &BTreeSet<String>,
        tick: u64,
    ) -> Result<u64, AdmissionError> {
        let definition = catalog
            .get(&request.task_name)
            .ok_or_else(|| AdmissionError::UnknownTask {
                name: request.task_name.clone(),
            })?;

        if let Some(missing) = definition
            .prerequisites
            .iter()
            .find(|prerequisite| !completed.contains(*prerequisite))
        {
            return Err(AdmissionError::PrerequisiteUnmet {
                task: definition.name.clone(),
                prerequisite: missing.clone(),
            });
        }

        ledger.debit_all(&definition.costs)?;

        let ticks_remaining = request
            .duration_override
            .unwrap_or(definition.duration_ticks)
            .max(1);
        let instance_id = self.next_instance_id;
        self.next_instance_id = self.next_instance_id.saturating_add(1);

        let instance = TaskInstance {
            instance_id,
            task_name: definition.name.clone(),
            placement: request.placement,
            ticks_remaining,
            admitted_at_tick: tick,
        };
        debug!(%instance, "task admitted");
        self.instances.insert(instance_id, instance);

        Ok(instance_id)
    }

    /// Advance every instance by one tick. Failure is rolled before the
    /// decrement; an instance that reaches zero leaves the queue in the same
    /// call and is handed back exactly once.
    pub fn tick(&mut self, failures: &mut FailurePolicy) -> QueueTick {
        let mut outcome = QueueTick::default();
        let ids = self.instances.keys().copied().collect::<Vec<_>>();

        for id in ids {
            let running = self
                .instances
                .get(&id)
                .is_some_and(|instance| instance.ticks_remaining > 0);
            if !running {
                continue;
            }

            if failures.roll() {
                if let Some(failed) = self.instances.remove(&id) {
                    outcome.failed.push(failed);
                }
            } else if let Some(instance) = self.instances.get_mut(&id) {
                instance.ticks_remaining -= 1;
            }
        }

        let finished = self
            .instances
            .iter()
            .filter(|(_, instance)| instance.ticks_remaining == 0)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in finished {
            if let Some(instance) = self.instances.remove(&id) {
                outcome.completed.push(instance);
            }
        }

        outcome
    }

    /// Snapshot of running instances in admission order.
    pub fn list_active(&self) -> Vec<TaskInstance> {
        self.instances.values().cloned().collect()
    }

    pub fn get(&self, instance_id: u64) -> Option<&TaskInstance> {
        self.instances.get(&instance_id)
    }

    pub fn next_instance_id(&self) -> u64 {
        self.next_instance_id
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
