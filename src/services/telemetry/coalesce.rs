use std::collections::HashMap;

use rumqttc::QoS;

#[derive(Clone, Debug)]
pub struct OutboundUpdate {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retained: bool,
}

impl OutboundUpdate {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retained: false,
        }
    }
}

/// Pending outbound updates keyed by topic. Rapid updates to the same topic
/// within the coalescing window collapse to the latest value; one flush task
/// drains the whole map.
#[derive(Default)]
pub struct CoalesceQueue {
    pending: HashMap<String, OutboundUpdate>,
    flush_scheduled: bool,
}

impl CoalesceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an update, replacing any pending value for the same topic.
    /// Returns true when the caller must schedule a flush (none pending yet).
    pub fn offer(&mut self, update: OutboundUpdate) -> bool {
        self.pending.insert(update.topic.clone(), update);

        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Takes everything pending and clears the scheduled flag; the flush task
    /// self-clears by running.
    pub fn drain(&mut self) -> Vec<OutboundUpdate> {
        self.flush_scheduled = false;
        self.pending.drain().map(|(_, update)| update).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapid_updates_collapse_to_latest() {
        let mut queue = CoalesceQueue::new();

        assert!(queue.offer(OutboundUpdate::new("panel/relay", "OFF")));
        for _ in 0..10 {
            assert!(!queue.offer(OutboundUpdate::new("panel/relay", "OFF")));
        }
        assert!(!queue.offer(OutboundUpdate::new("panel/relay", "ON")));

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload, b"ON");
    }

    #[test]
    fn test_distinct_topics_kept_apart() {
        let mut queue = CoalesceQueue::new();

        queue.offer(OutboundUpdate::new("panel/relay", "ON"));
        queue.offer(OutboundUpdate::new("panel/lux", "123"));

        assert_eq!(queue.drain().len(), 2);
    }

    #[test]
    fn test_flush_rescheduled_after_drain() {
        let mut queue = CoalesceQueue::new();

        assert!(queue.offer(OutboundUpdate::new("panel/relay", "ON")));
        queue.drain();
        assert!(queue.offer(OutboundUpdate::new("panel/relay", "OFF")));
    }
}
