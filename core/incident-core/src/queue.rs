//! Holding area for incidents that arrive while the stream is paused.
//!
//! Unbounded and FIFO: pausing defers visibility, it never discards data.
//! Filter and mute evaluation happen when the queue is drained, not here.

use std::collections::VecDeque;

use incident_protocol::Incident;

#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<Incident>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, incident: Incident) {
        self.items.push_back(incident);
    }

    /// Returns every queued incident in arrival order and empties the queue.
    pub fn drain_all(&mut self) -> Vec<Incident> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_protocol::{Severity, Status};

    fn incident(id: &str) -> Incident {
        Incident {
            id: id.to_string(),
            severity: Severity::Med,
            title: "Phishing email reported".to_string(),
            account: "retail-chain".to_string(),
            source: "Email".to_string(),
            timestamp: "2026-02-01T00:00:00Z".to_string(),
            status: Status::Open,
            tags: vec![],
            owner: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn drain_returns_fifo_and_empties() {
        let mut queue = PendingQueue::new();
        queue.enqueue(incident("a"));
        queue.enqueue(incident("b"));
        queue.enqueue(incident("a"));

        let drained: Vec<_> = queue.drain_all().into_iter().map(|i| i.id).collect();
        assert_eq!(drained, vec!["a", "b", "a"]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }
}
