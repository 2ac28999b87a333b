//! Tool abstraction for the review agent.
//!
//! The [`Tool`] trait defines what every capability the model can invoke must
//! provide: a static API definition (name, description, JSON schema) and an
//! async `execute` that receives parsed arguments plus the
//! [`ExecutionContext`] of the run it belongs to. Tools are collected into a
//! [`ToolRegistry`]; dispatch, budgeting, and logging live in
//! [`ToolExecutor`](super::executor::ToolExecutor).

use crate::ToolDef;
use crate::agent::context::{ExecutionContext, ToolCallRecord};
use crate::error::ToolError;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output fed back to the model.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Successful tool output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Text handed back to the model.
    pub data: String,
    /// Structured side information for the caller (not sent to the model).
    pub metadata: Option<serde_json::Value>,
    /// Calls made by a nested conversation this tool ran.
    pub nested_calls: Vec<ToolCallRecord>,
}

impl ToolOutput {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_nested_calls(mut self, calls: Vec<ToolCallRecord>) -> Self {
        self.nested_calls = calls;
        self
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct LookupSymbol { index: Arc<SymbolIndex> }
///
/// impl Tool for LookupSymbol {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("lookup_symbol", "Find a symbol definition", json_schema_for::<LookupArgs>())
///     }
///
///     fn execute<'a>(&'a self, args: &'a Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
///         Box::pin(async move {
///             let args: LookupArgs = parse_tool_args(args)?;
///             Ok(ToolOutput::text(self.index.find(&args.name)?))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Run the tool.
    ///
    /// Long-running tools should watch `ctx.cancellation` and return
    /// [`ToolError::Cancelled`] once it fires. Any other error becomes a
    /// failure result the model gets to see.
    fn execute<'a>(
        &'a self,
        args: &'a serde_json::Value,
        ctx: &'a ExecutionContext,
    ) -> ToolFuture<'a>;

    fn name(&self) -> String {
        self.definition().function.name
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Tools available to one conversation, keyed by name.
///
/// Cheap to clone; tools are shared behind `Arc`.
///
/// ```ignore
/// let registry = ToolRegistry::new()
///     .with(LookupSymbol::new(index))
///     .with_if(lsp_enabled, FindReferences::new(lsp));
/// let sub_registry = registry.without(SUBAGENT_EXCLUDED_TOOLS);
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_shared(Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn with_shared(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register_shared(tool);
        self
    }

    /// Register `tool` only when `condition` holds.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Add every tool from `other`, replacing same-named ones.
    pub fn merge(mut self, other: &ToolRegistry) -> Self {
        for tool in other.tools.values() {
            self.register_shared(Arc::clone(tool));
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions for the model API, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Copy of this registry without the named tools.
    pub fn without(&self, excluded: &[&str]) -> Self {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| !excluded.contains(&name.as_str()))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        Self { tools }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
///
/// Returns `None` when valid (or when the schema itself cannot be compiled),
/// otherwise a message the model can use to correct itself.
pub fn validate_tool_arguments(tool: &dyn Tool, args: &serde_json::Value) -> Option<String> {
    let def = tool.definition();
    let validator = jsonschema::validator_for(&def.function.parameters).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "argument validation failed for tool '{}':\n{}\n\
             Please fix the arguments and try again.",
            def.function.name,
            errors.join("\n")
        ))
    }
}

/// Log a tool call: a short preview at INFO, the full arguments at TRACE.
pub fn log_tool_call(name: &str, args: &serde_json::Value) {
    let raw = args.to_string();
    let preview: String = raw.chars().take(120).collect();
    info!(
        "[tool] {name}({preview}{})",
        if raw.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", raw.len());
    trace!("[tool] {name} arguments: {raw}");
}

/// Cap `s` at `max` bytes, cutting on a char boundary and appending a notice.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let (head, _) = s.split_at(cut);
    format!("{head}...\n[truncated: {} bytes total]", s.len())
}

/// Deserialize tool arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    args: &serde_json::Value,
) -> Result<T, ToolError> {
    T::deserialize(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

// ── Tests ──────────────────────────────────────────────────────────
