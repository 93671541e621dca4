//! Scripted in-memory graph client.
//!
//! Returns queued canned results in order (empty once drained) and records
//! every `(statement, parameters)` pair it was asked to run. Lets store and
//! tool code be exercised without a live database, mirroring the dummy
//! reasoning provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::AppError;
use crate::graph::Record;

#[derive(Debug, Clone, Default)]
pub struct ScriptedGraph {
    results: Arc<Mutex<VecDeque<Vec<Record>>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue result sets to be returned by successive `run` calls.
    pub fn with_results(results: Vec<Vec<Record>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Record>, AppError> {
        self.calls
            .lock()
            .expect("scripted graph calls lock")
            .push((statement.to_string(), parameters));
        Ok(self
            .results
            .lock()
            .expect("scripted graph results lock")
            .pop_front()
            .unwrap_or_default())
    }

    /// Every statement run so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("scripted graph calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("scripted graph calls lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn canned_results_drain_then_empty() {
        let mut record = Record::new();
        record.insert("n".into(), json!(1));
        let g = ScriptedGraph::with_results(vec![vec![record]]);

        let first = g.run("RETURN 1 AS n", Value::Null).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = g.run("RETURN 1 AS n", Value::Null).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn calls_are_recorded_in_order() {
        let g = ScriptedGraph::new();
        g.run("MATCH (n) RETURN n", json!({"a": 1})).await.unwrap();
        g.run("CREATE (n)", json!({"b": 2})).await.unwrap();

        let calls = g.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].0.starts_with("MATCH"));
        assert_eq!(calls[1].1["b"], 2);
    }
}
