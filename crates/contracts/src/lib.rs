//! v1 cross-boundary contracts for the colony engine, its store and its callers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod serde_opt_u64_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";
pub const DEFAULT_TICK_INTERVAL_SECS: f64 = 10.0;
pub const DEFAULT_LOW_RESOURCE_THRESHOLD: u64 = 20;
pub const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 2_000;

/// Resource name to amount. Ordered so snapshots and alerts are stable.
pub type ResourceAmounts = BTreeMap<String, u64>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub costs: ResourceAmounts,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub duration_ticks: u64,
    #[serde(default, alias = "generates")]
    pub rewards: ResourceAmounts,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, duration_ticks: u64) -> Self {
        Self {
            name: name.into(),
            description: None,
            costs: BTreeMap::new(),
            prerequisites: Vec::new(),
            duration_ticks,
            rewards: BTreeMap::new(),
        }
    }

    pub fn with_cost(mut self, resource: impl Into<String>, amount: u64) -> Self {
        self.costs.insert(resource.into(), amount);
        self
    }

    pub fn with_reward(mut self, resource: impl Into<String>, amount: u64) -> Self {
        self.rewards.insert(resource.into(), amount);
        self
    }

    pub fn with_prerequisite(mut self, task_name: impl Into<String>) -> Self {
        let task_name = task_name.into();
        if !self.prerequisites.contains(&task_name) {
            self.prerequisites.push(task_name);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInstance {
    pub instance_id: u64,
    pub task_name: String,
    pub placement: String,
    pub ticks_remaining: u64,
    pub admitted_at_tick: u64,
}

impl fmt::Display for TaskInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} @{} remaining={}",
            self.instance_id, self.task_name, self.placement, self.ticks_remaining
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Durable form of one world, exchanged with the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldSnapshot {
    pub schema_version: String,
    pub tick: u64,
    pub next_instance_id: u64,
    pub resources: ResourceAmounts,
    pub active_tasks: Vec<TaskInstance>,
    pub completed_tasks: BTreeSet<String>,
    pub alerts: Vec<String>,
}

/// Consistent read-only view returned by state queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateView {
    pub schema_version: String,
    pub tick: u64,
    pub resources: ResourceAmounts,
    pub active_tasks: Vec<TaskInstance>,
    pub completed_tasks: BTreeSet<String>,
    pub alerts: Vec<String>,
    pub scheduler: SchedulerState,
}

impl fmt::Display for StateView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources = self
            .resources
            .iter()
            .map(|(name, amount)| format!("{name}={amount}"))
            .collect::<Vec<_>>()
            .join(" ");
        write!(
            f,
            "tick={} scheduler={:?} resources=[{}] active_tasks={} alerts={}",
            self.tick,
            self.scheduler,
            resources,
            self.active_tasks.len(),
            self.alerts.len()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: String,
    pub tick_interval_secs: f64,
    pub low_resource_threshold: u64,
    pub failure_probability: f64,
    #[serde(with = "serde_opt_u64_string")]
    pub failure_seed: Option<u64>,
    pub persistence_timeout_ms: u64,
    pub initial_resources: ResourceAmounts,
    pub tasks: Vec<TaskDefinition>,
}

impl EngineConfig {
    /// Returns every problem found; an empty list means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.schema_version != SCHEMA_VERSION_V1 {
            problems.push(format!(
                "unsupported schema_version={} expected={}",
                self.schema_version, SCHEMA_VERSION_V1
            ));
        }
        if !self.tick_interval_secs.is_finite() || self.tick_interval_secs <= 0.0 {
            problems.push(format!(
                "tick_interval_secs must be a positive number, got {}",
                self.tick_interval_secs
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            problems.push(format!(
                "failure_probability must be in [0, 1], got {}",
                self.failure_probability
            ));
        }
        if self.persistence_timeout_ms == 0 {
            problems.push("persistence_timeout_ms must be >= 1".to_string());
        }

        problems
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            low_resource_threshold: DEFAULT_LOW_RESOURCE_THRESHOLD,
            failure_probability: 0.0,
            failure_seed: None,
            persistence_timeout_ms: DEFAULT_PERSISTENCE_TIMEOUT_MS,
            initial_resources: default_initial_resources(),
            tasks: Vec::new(),
        }
    }
}

pub fn default_initial_resources() -> ResourceAmounts {
    BTreeMap::from([
        ("energy".to_string(), 75),
        ("materials".to_string(), 60),
        ("data".to_string(), 40),
    ])
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownTask,
    PrerequisiteUnmet,
    InsufficientResources,
    PersistenceTimeout,
    PersistenceFailed,
    InvalidConfig,
    InvalidSnapshot,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{:?}: {} ({details})", self.error_code, self.message),
            None => write!(f, "{:?}: {}", self.error_code, self.message),
        }
    }
}
