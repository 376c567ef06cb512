//! Tick-driven task/resource engine for one colony world: a resource ledger,
//! an immutable task catalog, the queue of running tasks and the alert sink,
//! composed into a [`ColonyWorld`] that advances one discrete tick at a time.

pub mod alerts;
pub mod catalog;
pub mod failure;
pub mod ledger;
pub mod queue;
pub mod world;

pub use alerts::AlertSink;
pub use catalog::{CatalogError, TaskCatalog};
pub use failure::FailurePolicy;
pub use ledger::{LedgerError, ResourceLedger};
pub use queue::{AdmissionError, AdmissionRequest, QueueTick, TaskQueue};
pub use world::{ColonyWorld, TickReport, WorldError};
