use super::*;

impl ColonyWorld {
    /// One tick cycle: advance the queue, apply completion effects, record
    /// completions, then re-evaluate low-resource alerts. Persisting the
    /// result is the caller's job.
    pub fn tick(&mut self) -> TickReport {
        self.tick = self.tick.saturating_add(1);
        let tick = self.tick;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let outcome = self.queue.tick(&mut self.failures);

        for instance in &outcome.failed {
            debug!(%instance, tick, "task failed");
            let message = task_failed_message(&instance.task_name);
            if self.alerts.raise(message.clone()) {
                report.raised_alerts.push(message);
            }
        }

        for instance in &outcome.completed {
            self.apply_completion(instance, &mut report);
        }

        self.raise_low_resource_alerts(&mut report);

        report.completed = outcome.completed;
        report.failed = outcome.failed;
        report
    }

    pub fn tick_n(&mut self, n: u64) -> Vec<TickReport> {
        (0..n).map(|_| self.tick()).collect()
    }

    fn apply_completion(&mut self, instance: &TaskInstance, report: &mut TickReport) {
        if let Some(definition) = self.catalog.get(&instance.task_name) {
            for (resource, amount) in &definition.rewards {
                self.ledger.credit(resource, *amount);
            }
        }

        debug!(%instance, tick = report.tick, "task completed");
        if self.completed.insert(instance.task_name.clone()) {
            info!(task = %instance.task_name, tick = report.tick, "task completed for the first time");
            report.first_completions.push(instance.task_name.clone());
        }
    }

    fn raise_low_resource_alerts(&mut self, report: &mut TickReport) {
        let low = self
            .ledger
            .balances()
            .iter()
            .filter(|(_, amount)| **amount < self.low_resource_threshold)
            .map(|(name, amount)| (name.clone(), *amount))
            .collect::<Vec<_>>();

        for (resource, amount) in low {
            let message = low_resource_message(&resource);
            if self.alerts.raise(message.clone()) {
                warn!(%resource, amount, threshold = self.low_resource_threshold, "resource below threshold");
                report.raised_alerts.push(message);
            }
        }
    }
}
