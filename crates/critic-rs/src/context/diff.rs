//! Unified-diff structure for budget-aware truncation.
//!
//! When a proportional cut of a diff would keep only file headers, the
//! truncator falls back to [`truncate_preserving_hunks`], which keeps whole
//! `@@` hunks (with their file headers) greedily. If not even one hunk fits,
//! [`emergency_summary`] lists the changed file paths under an explicit
//! emergency-truncation marker.

use crate::context::tokenizer::TokenCounter;

/// Most file paths listed by [`emergency_summary`].
pub const MAX_SUMMARY_FILES: usize = 20;

/// Heading of the changed-files summary.
pub const EMERGENCY_MARKER: &str = "[emergency truncation: diff exceeds the token budget; changed files only]";

/// One file section of a unified diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    /// Path after the change (`+++` side), or the old path for deletions.
    pub path: String,
    /// Everything between the file start and its first hunk, newlines kept.
    pub header: String,
    /// Each hunk's `@@` line plus body, newlines kept.
    pub hunks: Vec<String>,
}

/// Split a unified diff into file sections and hunks.
///
/// Handles both `diff --git` output and plain `---`/`+++` diffs. Text before
/// the first file header is ignored.
pub fn parse_diff(text: &str) -> Vec<FileDiff> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut in_hunk = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let bare = line.trim_end_matches(['\n', '\r']);

        if bare.starts_with("diff --git ") {
            files.extend(current.take());
            current = Some(FileDiff {
                path: git_header_path(bare).to_string(),
                header: line.to_string(),
                hunks: Vec::new(),
            });
            in_hunk = false;
            i += 1;
            continue;
        }

        if bare.starts_with("--- ")
            && let Some(next) = lines.get(i + 1)
            && next.starts_with("+++ ")
        {
            if current.as_ref().is_none_or(|f| !f.hunks.is_empty()) {
                files.extend(current.take());
                current = Some(FileDiff::default());
            }
            if let Some(file) = current.as_mut() {
                file.header.push_str(line);
                file.header.push_str(next);
                let new_path = marker_path(next.trim_end_matches(['\n', '\r']));
                let old_path = marker_path(bare);
                let path = if new_path == "/dev/null" { old_path } else { new_path };
                if !path.is_empty() {
                    file.path = path.to_string();
                }
            }
            in_hunk = false;
            i += 2;
            continue;
        }

        if bare.starts_with("@@") {
            let file = current.get_or_insert_with(FileDiff::default);
            file.hunks.push(line.to_string());
            in_hunk = true;
        } else if let Some(file) = current.as_mut() {
            match file.hunks.last_mut() {
                Some(hunk) if in_hunk => hunk.push_str(line),
                _ => file.header.push_str(line),
            }
        }
        i += 1;
    }
    files.extend(current);
    files
}

/// Changed file paths in diff order, without duplicates.
pub fn changed_files(text: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for file in parse_diff(text) {
        if !file.path.is_empty() && !paths.contains(&file.path) {
            paths.push(file.path);
        }
    }
    paths
}

/// Whether `text` contains at least one hunk with an added or removed line.
/// Unchanged context lines do not count.
pub fn has_hunk_content(text: &str) -> bool {
    parse_diff(text).iter().flat_map(|f| &f.hunks).any(|hunk| {
        hunk.lines().skip(1).any(|l| {
            l.starts_with(['+', '-']) && !l.starts_with("+++") && !l.starts_with("---")
        })
    })
}

/// Whether a proportional cut of `original` is worth keeping. Non-diff text
/// only needs to be non-empty; a real diff must keep at least one change.
pub fn is_usable_cut(original: &str, cut: &str) -> bool {
    if cut.trim().is_empty() {
        return false;
    }
    let has_hunks = parse_diff(original).iter().any(|f| !f.hunks.is_empty());
    !has_hunks || has_hunk_content(cut)
}

fn omitted_marker(omitted: usize) -> String {
    format!("\n... [diff truncated: {omitted} hunk(s) omitted]")
}

/// Keep whole hunks, in diff order, while they fit in `budget` tokens.
///
/// A hunk that does not fit is skipped and later (smaller) hunks are still
/// tried. Returns `None` when no hunk fits at all.
pub fn truncate_preserving_hunks(
    counter: &dyn TokenCounter,
    text: &str,
    budget: usize,
) -> Option<String> {
    let files = parse_diff(text);
    let total: usize = files.iter().map(|f| f.hunks.len()).sum();
    if total == 0 || budget == 0 {
        return None;
    }

    let mut out = String::new();
    let mut kept = 0;
    for file in &files {
        let mut header_emitted = false;
        for hunk in &file.hunks {
            let mut piece = String::new();
            if !header_emitted {
                piece.push_str(&file.header);
            }
            piece.push_str(hunk);

            let omitted_after = total - kept - 1;
            let candidate = if omitted_after > 0 {
                format!("{out}{piece}{}", omitted_marker(omitted_after))
            } else {
                format!("{out}{piece}")
            };
            if counter.count(&candidate) <= budget {
                out.push_str(&piece);
                header_emitted = true;
                kept += 1;
            }
        }
    }

    if kept == 0 {
        return None;
    }
    if kept < total {
        out.push_str(&omitted_marker(total - kept));
    }
    Some(out)
}

/// Last-resort rendering: the changed file paths (at most
/// [`MAX_SUMMARY_FILES`]) under [`EMERGENCY_MARKER`]. Drops paths until it
/// fits; `None` if even the bare marker does not.
pub fn emergency_summary(counter: &dyn TokenCounter, text: &str, budget: usize) -> Option<String> {
    let files = changed_files(text);
    let listed = files.len().min(MAX_SUMMARY_FILES);
    (0..=listed)
        .rev()
        .map(|n| render_summary(&files, n))
        .find(|s| counter.count(s) <= budget)
}

fn render_summary(files: &[String], shown: usize) -> String {
    let mut out = format!("{EMERGENCY_MARKER}\n");
    for path in files.iter().take(shown) {
        out.push_str(&format!("- {path}\n"));
    }
    let hidden = files.len().saturating_sub(shown);
    if hidden > 0 {
        out.push_str(&format!("- ... and {hidden} more file(s)\n"));
    }
    out
}

fn git_header_path(line: &str) -> &str {
    line.rsplit_once(" b/").map_or("", |(_, p)| p.trim())
}

/// Path from a `--- a/x` / `+++ b/x` line, without the side prefix or any
/// trailing timestamp.
fn marker_path(line: &str) -> &str {
    let raw = line.get(4..).unwrap_or("");
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    raw.strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw)
}
