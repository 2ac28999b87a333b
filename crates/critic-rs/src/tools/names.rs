//! Canonical tool name constants.
//!
//! All tool-name string literals should reference these constants to avoid
//! scattered magic strings.

pub const RUN_SUBAGENT: &str = "run_subagent";
pub const SUBMIT_REVIEW: &str = "submit_review";
pub const UPDATE_PLAN: &str = "update_plan";

/// Tools a subagent never gets: recursive spawning, and tools that only make
/// sense in the main analysis (completion marker, plan tracking).
pub const SUBAGENT_EXCLUDED_TOOLS: &[&str] = &[RUN_SUBAGENT, SUBMIT_REVIEW, UPDATE_PLAN];
