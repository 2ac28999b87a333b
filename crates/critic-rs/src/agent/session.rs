//! Session-scoped subagent budget and cancellation fan-out.
//!
//! One [`SubagentSessionManager`] exists per top-level analysis and is shared
//! (via `Arc`) by every execution context inside it, including subagent
//! contexts. It caps how many subagents the whole session may spawn, hands
//! out gap-free sequential IDs, and owns the registry of child cancellation
//! tokens so that cancelling the session stops every running subagent.

use crate::agent::config::SettingsProvider;
use crate::error::AgentError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SubagentSessionManager {
    settings: Arc<dyn SettingsProvider>,
    spawned: AtomicU32,
    parent: CancellationToken,
    children: Mutex<Vec<CancellationToken>>,
}

impl std::fmt::Debug for SubagentSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentSessionManager")
            .field("spawned", &self.count())
            .field("max", &self.max())
            .finish()
    }
}

impl SubagentSessionManager {
    /// `parent` is the session's cancellation token.
    pub fn new(settings: Arc<dyn SettingsProvider>, parent: CancellationToken) -> Self {
        Self {
            settings,
            spawned: AtomicU32::new(0),
            parent,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Cap read from settings on every call.
    fn max(&self) -> u32 {
        self.settings.settings().max_subagents
    }

    pub fn can_spawn(&self) -> bool {
        self.count() < self.max()
    }

    /// Reserve the next subagent ID (1, 2, 3, ...).
    ///
    /// The check and the increment are a single atomic update, so the count
    /// can never pass the cap and IDs never skip.
    pub fn record_spawn(&self) -> Result<u32, AgentError> {
        let max = self.max();
        match self
            .spawned
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            }) {
            Ok(prev) => {
                let id = prev + 1;
                debug!("Subagent #{id} reserved ({id}/{max})");
                Ok(id)
            }
            Err(_) => {
                info!("Subagent spawn rejected: session limit of {max} reached");
                Err(AgentError::SubagentLimitExceeded { max })
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn remaining_budget(&self) -> u32 {
        self.max().saturating_sub(self.count())
    }

    /// Cancellation token for a new subagent. Cancelling the session token
    /// cancels it; cancelling it does not affect the session.
    pub fn register_child(&self) -> CancellationToken {
        let child = self.parent.child_token();
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.retain(|c| !c.is_cancelled());
        children.push(child.clone());
        child
    }

    /// Registered children that have not been cancelled.
    pub fn active_children(&self) -> usize {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| !c.is_cancelled())
            .count()
    }

    /// Cancel every registered child without cancelling the session.
    pub fn cancel_children(&self) {
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        for child in children.iter() {
            child.cancel();
        }
    }

    pub fn session_token(&self) -> &CancellationToken {
        &self.parent
    }

    /// Back to the initial state: count 0, next ID 1, no children. Children
    /// still registered are cancelled.
    pub fn reset(&self) {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        for child in children.drain(..) {
            child.cancel();
        }
        self.spawned.store(0, Ordering::SeqCst);
    }
}
