//! Metrics sink trait and simple sinks.
//!
//! K_i: The dispatcher appends one record at a time from many tasks at once.
//! K_i: Nothing is flushed implicitly; the owner of a dispatch calls `flush`.

use crate::metrics::AttemptRecord;
use crate::models::Result;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receiver for attempt records.
///
/// `record` is called concurrently and must not block for long.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: AttemptRecord);

    /// Persist or report whatever has been accumulated.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _record: AttemptRecord) {}
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AttemptRecord>> {
        // A panicking recorder cannot leave a Vec half-pushed.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of all records so far, in arrival order.
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.lock().clone()
    }

    /// Records for one call on one endpoint, in arrival order.
    pub fn records_for(&self, endpoint: &str, call_id: &str) -> Vec<AttemptRecord> {
        self.lock()
            .iter()
            .filter(|r| r.endpoint == endpoint && r.call_id == call_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<AttemptRecord> {
        std::mem::take(&mut *self.lock())
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, record: AttemptRecord) {
        self.lock().push(record);
    }
}

/// Forwards each record to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for FanoutSink {
    fn record(&self, record: AttemptRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(record.clone());
            }
            last.record(record);
        }
    }

    /// Flushes every sink; the first error wins.
    fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordKind;
    use crate::models::FanoutError;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn record(call_id: &str) -> AttemptRecord {
        AttemptRecord {
            endpoint: "a".into(),
            call_id: call_id.into(),
            tags: BTreeSet::new(),
            kind: RecordKind::Attempt {
                attempt: 1,
                success: true,
                error: None,
            },
            input_size: 1,
            output_size: 1,
            elapsed: Duration::ZERO,
        }
    }

    struct CountingSink {
        seen: AtomicUsize,
        fail_flush: bool,
    }

    impl MetricsSink for CountingSink {
        fn record(&self, _record: AttemptRecord) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn flush(&self) -> Result<()> {
            if self.fail_flush {
                Err(FanoutError::Internal("flush failed".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_memory_sink_filters_and_drains() {
        let sink = MemorySink::new();
        sink.record(record("c1"));
        sink.record(record("c2"));
        sink.record(record("c1"));

        assert_eq!(sink.records_for("a", "c1").len(), 2);
        assert_eq!(sink.records_for("b", "c1").len(), 0);
        assert_eq!(sink.drain().len(), 3);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_memory_sink_concurrent_appends() {
        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        sink.record(record(&format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.len(), 800);
    }

    #[test]
    fn test_fanout_sink_forwards_and_flushes_all() {
        let a = Arc::new(CountingSink {
            seen: AtomicUsize::new(0),
            fail_flush: true,
        });
        let b = Arc::new(CountingSink {
            seen: AtomicUsize::new(0),
            fail_flush: false,
        });
        let fanout = FanoutSink::new()
            .with(a.clone() as Arc<dyn MetricsSink>)
            .with(b.clone() as Arc<dyn MetricsSink>);

        fanout.record(record("c1"));
        fanout.record(record("c2"));

        assert_eq!(a.seen.load(Ordering::SeqCst), 2);
        assert_eq!(b.seen.load(Ordering::SeqCst), 2);
        assert!(fanout.flush().is_err());
    }
}
