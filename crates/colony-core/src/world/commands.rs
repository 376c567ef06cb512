use super::*;

impl ColonyWorld {
    pub fn assign_task(&mut self, request: AdmissionRequest) -> Result<u64, AdmissionError> {
        let task_name = request.task_name.clone();
        let result = self.queue.admit(
            request,
            &self.catalog,
            &mut self.ledger,
            &self.completed,
            self.tick,
        );

        if let Err(err) = &result {
            debug!(task = %task_name, tick = self.tick, %err, "task rejected");
        }
        result
    }

    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }

    pub fn drain_alerts(&mut self) -> Vec<String> {
        self.alerts.drain_all()
    }

    /// Definitions whose prerequisites have completed and whose costs the
    /// ledger covers right now.
    pub fn available_tasks(&self) -> Vec<TaskDefinition> {
        self.catalog
            .definitions()
            .iter()
            .filter(|definition| {
                definition
                    .prerequisites
                    .iter()
                    .all(|prerequisite| self.completed.contains(prerequisite))
            })
            .filter(|definition| self.ledger.can_cover(&definition.costs))
            .cloned()
            .collect()
    }
}
