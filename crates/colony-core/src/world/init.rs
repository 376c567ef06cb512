use super::*;

impl ColonyWorld {
    /// A fresh world seeded from `config.initial_resources`.
    pub fn new(config: &EngineConfig, catalog: TaskCatalog) -> Self {
        Self {
            catalog,
            ledger: ResourceLedger::seeded(&config.initial_resources),
            queue: TaskQueue::new(),
            completed: BTreeSet::new(),
            alerts: AlertSink::default(),
            failures: FailurePolicy::new(config.failure_probability, config.failure_seed),
            low_resource_threshold: config.low_resource_threshold,
            tick: 0,
            baseline: config.initial_resources.clone(),
        }
    }

    /// Rebuild a world from its durable form, rejecting anything the catalog
    /// cannot account for before a single operation runs against it.
    pub fn from_snapshot(
        config: &EngineConfig,
        catalog: TaskCatalog,
        snapshot: WorldSnapshot,
    ) -> Result<Self, WorldError> {
        validate_snapshot(&catalog, &snapshot)?;

        let WorldSnapshot {
            tick,
            next_instance_id,
            resources,
            active_tasks,
            completed_tasks,
            alerts,
            ..
        } = snapshot;

        Ok(Self {
            catalog,
            ledger: ResourceLedger::seeded(&resources),
            queue: TaskQueue::restore(active_tasks, next_instance_id),
            completed: completed_tasks,
            alerts: AlertSink::from_messages(alerts),
            failures: FailurePolicy::new(config.failure_probability, config.failure_seed),
            low_resource_threshold: config.low_resource_threshold,
            tick,
            baseline: resources,
        })
    }
}

fn validate_snapshot(catalog: &TaskCatalog, snapshot: &WorldSnapshot) -> Result<(), WorldError> {
    if snapshot.schema_version != SCHEMA_VERSION_V1 {
        return Err(WorldError::SchemaVersion {
            found: snapshot.schema_version.clone(),
            expected: SCHEMA_VERSION_V1.to_string(),
        });
    }

    let mut seen = BTreeSet::new();
    for instance in &snapshot.active_tasks {
        if !catalog.contains(&instance.task_name) {
            return Err(WorldError::UnknownActiveTask {
                instance_id: instance.instance_id,
                task_name: instance.task_name.clone(),
            });
        }
        if !seen.insert(instance.instance_id) {
            return Err(WorldError::DuplicateInstance(instance.instance_id));
        }
        if instance.instance_id >= snapshot.next_instance_id {
            return Err(WorldError::InstanceIdOutOfRange {
                instance_id: instance.instance_id,
                next_instance_id: snapshot.next_instance_id,
            });
        }
        if instance.ticks_remaining == 0 {
            return Err(WorldError::ZeroRemaining(instance.instance_id));
        }
    }

    if let Some(unknown) = snapshot
        .completed_tasks
        .iter()
        .find(|name| !catalog.contains(name))
    {
        return Err(WorldError::UnknownCompletedTask(unknown.clone()));
    }

    Ok(())
}
