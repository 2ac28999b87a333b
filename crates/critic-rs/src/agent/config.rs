//! Settings and runner configuration.
//!
//! Limits (iterations, tool calls, subagents, timeouts, content priority) are
//! never cached at construction. Consumers hold an
//! `Arc<dyn SettingsProvider>` and read it each time they need a value, so a
//! change made through [`SharedSettings::update`] takes effect on the next
//! check.
//!
//! ```ignore
//! let settings = Arc::new(SharedSettings::new(AgentSettings::load("critic.json")?));
//! let config = RunnerConfig::new("review")
//!     .with_system_prompt("You are a meticulous reviewer.")
//!     .with_completion_predicate(|_, text| text.contains("LGTM"));
//! ```

use crate::agent::runner::ConversationState;
use crate::context::priority::ContentPrioritization;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ── Settings ───────────────────────────────────────────────────────

/// User-tunable limits for one review session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model identifier passed to the model client.
    pub model: String,
    /// Iteration ceiling for the main conversation.
    pub max_iterations: u32,
    /// Tool-call ceiling per tool executor.
    pub max_tool_calls: u32,
    /// Subagents one session may spawn.
    pub max_subagents: u32,
    /// Iteration ceiling inside each subagent.
    pub subagent_max_iterations: u32,
    /// Wall-clock limit for one subagent investigation.
    pub subagent_timeout_secs: u64,
    /// HTTP timeout for a single model request.
    pub request_timeout_secs: u64,
    /// Waterfall order for prompt content.
    pub content_priority: ContentPrioritization,
    /// Model input window. `None` defers to the tokenizer, then a fallback.
    pub max_input_tokens: Option<usize>,
    /// Fraction of the input window the prompt may occupy.
    pub safety_ratio: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: crate::api::openrouter::DEFAULT_MODEL.to_string(),
            max_iterations: 25,
            max_tool_calls: 60,
            max_subagents: 5,
            subagent_max_iterations: 10,
            subagent_timeout_secs: 120,
            request_timeout_secs: 120,
            content_priority: ContentPrioritization::default(),
            max_input_tokens: None,
            safety_ratio: crate::context::calculator::DEFAULT_SAFETY_RATIO,
        }
    }
}

impl AgentSettings {
    /// Read settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        let settings: Self = serde_json::from_str(&raw).map_err(|e| {
            AgentError::Config(format!("invalid settings file {}: {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if self.subagent_max_iterations == 0 {
            return Err(AgentError::Config(
                "subagent_max_iterations must be at least 1".into(),
            ));
        }
        if !(self.safety_ratio > 0.0 && self.safety_ratio <= 1.0) {
            return Err(AgentError::Config(format!(
                "safety_ratio must be in (0, 1], got {}",
                self.safety_ratio
            )));
        }
        Ok(())
    }

    pub fn subagent_timeout(&self) -> Duration {
        Duration::from_secs(self.subagent_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Live accessor for settings.
pub trait SettingsProvider: Send + Sync {
    /// Current settings snapshot.
    fn settings(&self) -> AgentSettings;
}

/// Fixed settings.
impl SettingsProvider for AgentSettings {
    fn settings(&self) -> AgentSettings {
        self.clone()
    }
}

/// Settings that can change while a session runs.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<AgentSettings>>,
}

impl SharedSettings {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Mutate the settings in place. Readers see the change on their next read.
    pub fn update(&self, f: impl FnOnce(&mut AgentSettings)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> AgentSettings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ── Runner config ──────────────────────────────────────────────────

/// Decides whether a text-only response ends the conversation.
///
/// Receives the conversation so far and the response text. Returning `false`
/// makes the runner nudge the model to keep going.
pub type CompletionPredicate = Arc<dyn Fn(&ConversationState, &str) -> bool + Send + Sync>;

/// Default nudge sent when a response is not an explicit completion.
pub const DEFAULT_NUDGE: &str = "You have not finished yet. Continue the analysis and \
     complete it explicitly as instructed.";

/// Per-run configuration for a [`ConversationRunner`](super::runner::ConversationRunner).
#[derive(Clone)]
pub struct RunnerConfig {
    /// Human-readable label for logs and progress messages.
    pub label: String,
    /// Prepended as a system message when set.
    pub system_prompt: Option<String>,
    /// Overrides `AgentSettings::max_iterations` when set.
    pub max_iterations: Option<u32>,
    /// When set, text-only responses must satisfy it to complete the run.
    pub completion_predicate: Option<CompletionPredicate>,
    /// Also check the predicate after each round of tool calls, so a run
    /// whose completion is signalled by a tool ends without another request.
    pub complete_after_tools: bool,
    pub nudge_message: String,
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("label", &self.label)
            .field("max_iterations", &self.max_iterations)
            .field(
                "requires_explicit_completion",
                &self.completion_predicate.is_some(),
            )
            .field("complete_after_tools", &self.complete_after_tools)
            .finish()
    }
}

impl RunnerConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            system_prompt: None,
            max_iterations: None,
            completion_predicate: None,
            complete_after_tools: false,
            nudge_message: DEFAULT_NUDGE.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Require explicit completion, judged by `predicate`.
    pub fn with_completion_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConversationState, &str) -> bool + Send + Sync + 'static,
    {
        self.completion_predicate = Some(Arc::new(predicate));
        self
    }

    /// Finish as soon as a tool round satisfies the completion predicate.
    pub fn with_completion_after_tools(mut self) -> Self {
        self.complete_after_tools = true;
        self
    }

    pub fn with_nudge_message(mut self, message: impl Into<String>) -> Self {
        self.nudge_message = message.into();
        self
    }

    pub fn requires_explicit_completion(&self) -> bool {
        self.completion_predicate.is_some()
    }
}
