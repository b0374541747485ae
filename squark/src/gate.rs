use std::time::{Duration, Instant};

/// Lets a frame through at most once per `min_interval` of wall-clock time.
pub struct IngestGate {
    min_interval: Duration,
    last_ingest: Option<Instant>,
}

impl IngestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_ingest: None,
        }
    }

    /// True if nothing was ingested yet or `min_interval` has passed since.
    pub fn is_open(&self, now: Instant) -> bool {
        self.last_ingest
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval)
    }

    pub fn record(&mut self, now: Instant) {
        self.last_ingest = Some(now);
    }
}
