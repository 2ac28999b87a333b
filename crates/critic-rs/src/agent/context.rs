//! Per-analysis execution context threaded through every tool call.

use crate::agent::session::SubagentSessionManager;
use crate::agent::sub_agent::SubagentExecutor;
use crate::api::tracing::subagent_trace_id;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// One executed (or rejected) tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    pub result: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Calls made inside a subagent spawned by this call.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested_calls: Vec<ToolCallRecord>,
}

impl ToolCallRecord {
    /// Number of calls in this record's subtree, itself included.
    pub fn tree_size(&self) -> usize {
        1 + self
            .nested_calls
            .iter()
            .map(ToolCallRecord::tree_size)
            .sum::<usize>()
    }
}

/// Shared, append-only list of call records.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<ToolCallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ToolCallRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    pub fn snapshot(&self) -> Vec<ToolCallRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a tool sees about the run it is part of.
///
/// One per top-level analysis. A subagent gets a fresh context from
/// [`for_subagent`](Self::for_subagent) that shares the session manager and
/// subagent executor but has its own cancellation token, iteration counter,
/// and nested call log.
#[derive(Clone)]
pub struct ExecutionContext {
    pub trace_id: String,
    pub label: String,
    iteration: Arc<AtomicU32>,
    pub session: Arc<SubagentSessionManager>,
    pub subagent_executor: Option<Arc<SubagentExecutor>>,
    pub cancellation: CancellationToken,
    nested_calls: Option<CallLog>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("trace_id", &self.trace_id)
            .field("label", &self.label)
            .field("iteration", &self.iteration())
            .field("is_subagent", &self.is_subagent())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(
        trace_id: impl Into<String>,
        label: impl Into<String>,
        session: Arc<SubagentSessionManager>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            label: label.into(),
            iteration: Arc::new(AtomicU32::new(0)),
            session,
            subagent_executor: None,
            cancellation,
            nested_calls: None,
        }
    }

    pub fn with_subagent_executor(mut self, executor: Arc<SubagentExecutor>) -> Self {
        self.subagent_executor = Some(executor);
        self
    }

    /// Context for subagent `id`, running under `cancellation` and recording
    /// its calls into `log`.
    pub fn for_subagent(&self, id: u32, cancellation: CancellationToken, log: CallLog) -> Self {
        Self {
            trace_id: subagent_trace_id(&self.trace_id, id),
            label: format!("{} > subagent #{id}", self.label),
            iteration: Arc::new(AtomicU32::new(0)),
            session: Arc::clone(&self.session),
            subagent_executor: self.subagent_executor.clone(),
            cancellation,
            nested_calls: Some(log),
        }
    }

    /// Current iteration of the conversation this context belongs to.
    pub fn iteration(&self) -> u32 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn set_iteration(&self, iteration: u32) {
        self.iteration.store(iteration, Ordering::Relaxed);
    }

    pub fn is_subagent(&self) -> bool {
        self.nested_calls.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Record a call made inside a subagent. No-op at top level.
    pub fn record_nested(&self, record: &ToolCallRecord) {
        if let Some(log) = &self.nested_calls {
            log.push(record.clone());
        }
    }
}
