/// Append-only, de-duplicated list of player-facing warnings.
///
/// The message text is its own key. Only an explicit `clear`/`drain_all`
/// removes anything; recovering from the condition that raised an alert
/// does not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertSink {
    messages: Vec<String>,
}

impl AlertSink {
    pub fn from_messages(messages: impl IntoIterator<Item = String>) -> Self {
        let mut sink = Self::default();
        for message in messages {
            sink.raise(message);
        }
        sink
    }

    /// Returns `true` when the message was not already present.
    pub fn raise(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.messages.contains(&message) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn drain_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

pub fn low_resource_message(resource: &str) -> String {
    format!("Low {resource} levels!")
}

pub fn task_failed_message(task_name: &str) -> String {
    format!("Task {task_name} failed!")
}
