use chrono::{
    DateTime,
    Utc,
};
use collector_client::StatsSnapshot;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

/// Session-lifetime counters. Written by the consumption loop, read
/// concurrently by the health monitor for heartbeat payloads.
#[derive(Debug)]
pub struct SessionStats {
    start_time: DateTime<Utc>,
    messages_processed: AtomicU64,
    participants_found: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            messages_processed: AtomicU64::new(0),
            participants_found: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn record_message(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_participant(&self) {
        self.participants_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Matches the registry size: one increment per newly inserted key.
    pub fn participants_found(&self) -> u64 {
        self.participants_found.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            start_time: self.start_time,
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            participants_found: self.participants_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counters_accumulate_into_the_snapshot() {
        let stats = SessionStats::new();
        stats.record_message();
        stats.record_message();
        stats.record_participant();
        stats.record_error();
        stats.record_reconnect();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_processed, 2);
        assert_eq!(snapshot.participants_found, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.start_time, stats.start_time);
    }
}
