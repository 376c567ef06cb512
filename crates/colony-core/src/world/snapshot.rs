use super::*;

impl ColonyWorld {
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick: self.tick,
            next_instance_id: self.queue.next_instance_id(),
            resources: self.ledger.balances().clone(),
            active_tasks: self.queue.list_active(),
            completed_tasks: self.completed.clone(),
            alerts: self.alerts.messages().to_vec(),
        }
    }

    pub fn state_view(&self, scheduler: SchedulerState) -> StateView {
        StateView {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick: self.tick,
            resources: self.ledger.balances().clone(),
            active_tasks: self.queue.list_active(),
            completed_tasks: self.completed.clone(),
            alerts: self.alerts.messages().to_vec(),
            scheduler,
        }
    }
}
