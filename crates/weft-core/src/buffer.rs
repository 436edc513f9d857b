//! Edge buffer store.
//!
//! Records produced by one step and not yet consumed by the next live in
//! per-execution FIFO buffers keyed by `(execution_id, target_node,
//! target_port)`. A per-execution atomic counter caps total buffered
//! records; the cap is checked before any append so the counter never
//! passes the limit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use weft_workflow::Record;

use crate::error::{EngineError, EngineResult};

/// Buffer key: one FIFO per (execution, consuming node, consuming port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub execution_id: String,
    pub target_node_id: String,
    pub target_port: String,
}

impl BufferKey {
    pub fn new(
        execution_id: impl Into<String>,
        target_node_id: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            target_node_id: target_node_id.into(),
            target_port: target_port.into(),
        }
    }
}

/// Thread-safe store of edge buffers with a per-execution record cap.
///
/// Buffers of different executions are fully isolated: each execution has
/// its own counter, and clearing one execution never touches another.
pub struct EdgeBufferStore {
    buffers: DashMap<BufferKey, VecDeque<Record>>,
    counters: DashMap<String, Arc<AtomicI64>>,
    max_buffered_records: i64,
}

impl EdgeBufferStore {
    pub fn new(max_buffered_records: i64) -> Self {
        Self {
            buffers: DashMap::new(),
            counters: DashMap::new(),
            max_buffered_records,
        }
    }

    /// The configured per-execution cap.
    pub fn limit(&self) -> i64 {
        self.max_buffered_records
    }

    fn counter(&self, execution_id: &str) -> Arc<AtomicI64> {
        self.counters
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }

    /// Append one record. Fails with [`EngineError::BufferOverflow`] when
    /// the execution's buffered-record budget is exhausted; on failure the
    /// counter is left at the limit, not past it.
    pub fn append(
        &self,
        execution_id: &str,
        target_node_id: &str,
        target_port: &str,
        record: Record,
    ) -> EngineResult<()> {
        let counter = self.counter(execution_id);
        let limit = self.max_buffered_records;

        let admitted = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if count >= limit {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok();

        if !admitted {
            return Err(EngineError::BufferOverflow {
                execution_id: execution_id.to_string(),
                limit,
            });
        }

        let key = BufferKey::new(execution_id, target_node_id, target_port);
        self.buffers.entry(key).or_default().push_back(record);
        Ok(())
    }

    /// Return and remove everything buffered for the key. FIFO order.
    pub fn drain(
        &self,
        execution_id: &str,
        target_node_id: &str,
        target_port: &str,
    ) -> Vec<Record> {
        let key = BufferKey::new(execution_id, target_node_id, target_port);
        match self.buffers.remove(&key) {
            Some((_, queue)) => queue.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot without removal.
    pub fn peek(
        &self,
        execution_id: &str,
        target_node_id: &str,
        target_port: &str,
    ) -> Vec<Record> {
        let key = BufferKey::new(execution_id, target_node_id, target_port);
        self.buffers
            .get(&key)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether anything is buffered for the key.
    pub fn has_records(&self, execution_id: &str, target_node_id: &str, target_port: &str) -> bool {
        let key = BufferKey::new(execution_id, target_node_id, target_port);
        self.buffers.get(&key).is_some_and(|q| !q.is_empty())
    }

    /// Drop every buffer of an execution and reset its counter.
    pub fn clear_execution(&self, execution_id: &str) {
        self.buffers
            .retain(|key, _| key.execution_id != execution_id);
        self.counters.remove(execution_id);
    }

    /// Current buffered-record count for an execution.
    pub fn buffered_count(&self, execution_id: &str) -> i64 {
        self.counters
            .get(execution_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(n: i64) -> Record {
        Record::from_value(json!({ "n": n }))
    }

    #[test]
    fn drain_preserves_append_order() {
        let store = EdgeBufferStore::new(100);
        for n in 0..5 {
            store.append("e1", "sink", "in", record(n)).unwrap();
        }

        let drained = store.drain("e1", "sink", "in");
        let ns: Vec<i64> = drained
            .iter()
            .map(|r| r.get("n").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);

        // Drained means gone.
        assert!(store.drain("e1", "sink", "in").is_empty());
    }

    #[test]
    fn overflow_fails_before_counter_passes_limit() {
        let store = EdgeBufferStore::new(3);
        for n in 0..3 {
            store.append("e1", "sink", "in", record(n)).unwrap();
        }

        let err = store.append("e1", "sink", "in", record(99)).unwrap_err();
        match err {
            EngineError::BufferOverflow { execution_id, limit } => {
                assert_eq!(execution_id, "e1");
                assert_eq!(limit, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.buffered_count("e1"), 3);
        assert_eq!(store.drain("e1", "sink", "in").len(), 3);
    }

    #[test]
    fn executions_are_isolated() {
        let store = EdgeBufferStore::new(2);
        store.append("e1", "sink", "in", record(1)).unwrap();
        store.append("e1", "sink", "in", record(2)).unwrap();

        // e1 is full; e2 is unaffected.
        assert!(store.append("e1", "sink", "in", record(3)).is_err());
        store.append("e2", "sink", "in", record(1)).unwrap();
        assert_eq!(store.buffered_count("e2"), 1);

        store.clear_execution("e1");
        assert_eq!(store.buffered_count("e1"), 0);
        assert!(store.has_records("e2", "sink", "in"));
    }

    #[test]
    fn clear_resets_the_counter() {
        let store = EdgeBufferStore::new(1);
        store.append("e1", "sink", "in", record(1)).unwrap();
        assert!(store.append("e1", "sink", "in", record(2)).is_err());

        store.clear_execution("e1");
        store.append("e1", "sink", "in", record(3)).unwrap();
    }

    #[test]
    fn peek_does_not_consume() {
        let store = EdgeBufferStore::new(10);
        store.append("e1", "sink", "in", record(1)).unwrap();
        assert_eq!(store.peek("e1", "sink", "in").len(), 1);
        assert!(store.has_records("e1", "sink", "in"));
        assert_eq!(store.drain("e1", "sink", "in").len(), 1);
    }
}
