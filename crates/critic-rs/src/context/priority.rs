//! Content types competing for the prompt budget, and their priority order.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four kinds of truncatable prompt content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Diff,
    Embedding,
    LspReference,
    LspDefinition,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Diff,
        ContentType::Embedding,
        ContentType::LspReference,
        ContentType::LspDefinition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Diff => "diff",
            ContentType::Embedding => "embedding",
            ContentType::LspReference => "lsp-reference",
            ContentType::LspDefinition => "lsp-definition",
        }
    }

    /// Section heading used when the bucket is rendered into the prompt.
    pub fn heading(self) -> &'static str {
        match self {
            ContentType::Diff => "Changes under review",
            ContentType::Embedding => "Related code (semantic search)",
            ContentType::LspReference => "References to changed symbols",
            ContentType::LspDefinition => "Definitions of referenced symbols",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waterfall processing order: a permutation of all four [`ContentType`]s.
///
/// Deserializes from a JSON array such as
/// `["diff", "lsp-definition", "embedding", "lsp-reference"]` and rejects
/// anything that is not a permutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ContentType>", into = "Vec<ContentType>")]
pub struct ContentPrioritization {
    order: [ContentType; 4],
}

impl ContentPrioritization {
    pub fn new(order: Vec<ContentType>) -> Result<Self, AgentError> {
        Self::try_from(order)
    }

    /// Types from highest to lowest priority.
    pub fn order(&self) -> &[ContentType] {
        &self.order
    }

    /// Position of `ty` in the order (0 = highest priority).
    pub fn rank(&self, ty: ContentType) -> usize {
        self.order
            .iter()
            .position(|t| *t == ty)
            .unwrap_or(self.order.len())
    }
}

impl Default for ContentPrioritization {
    fn default() -> Self {
        Self {
            order: ContentType::ALL,
        }
    }
}

impl TryFrom<Vec<ContentType>> for ContentPrioritization {
    type Error = AgentError;

    fn try_from(order: Vec<ContentType>) -> Result<Self, Self::Error> {
        let order: [ContentType; 4] = order.try_into().map_err(|v: Vec<ContentType>| {
            AgentError::Config(format!(
                "content priority must list all 4 content types, got {}",
                v.len()
            ))
        })?;
        if let Some(missing) = ContentType::ALL.iter().find(|t| !order.contains(t)) {
            return Err(AgentError::Config(format!(
                "content priority is missing '{missing}'"
            )));
        }
        Ok(Self { order })
    }
}

impl From<ContentPrioritization> for Vec<ContentType> {
    fn from(p: ContentPrioritization) -> Self {
        p.order.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_puts_diff_first() {
        let p = ContentPrioritization::default();
        assert_eq!(p.order()[0], ContentType::Diff);
        assert_eq!(p.rank(ContentType::LspDefinition), 3);
    }

    #[test]
    fn parses_kebab_case_permutation() {
        let p: ContentPrioritization = serde_json::from_str(
            r#"["lsp-definition", "diff", "embedding", "lsp-reference"]"#,
        )
        .unwrap();
        assert_eq!(p.rank(ContentType::LspDefinition), 0);
        assert_eq!(p.rank(ContentType::Diff), 1);
        assert_eq!(
            serde_json::to_value(&p).unwrap()[0],
            serde_json::json!("lsp-definition")
        );
    }

    #[test]
    fn rejects_duplicates_and_short_lists() {
        let dup = ContentPrioritization::new(vec![
            ContentType::Diff,
            ContentType::Diff,
            ContentType::Embedding,
            ContentType::LspReference,
        ]);
        assert!(matches!(dup, Err(AgentError::Config(msg)) if msg.contains("lsp-definition")));

        let short = ContentPrioritization::new(vec![ContentType::Diff]);
        assert!(short.is_err());
        assert!(serde_json::from_str::<ContentPrioritization>(r#"["diff"]"#).is_err());
    }
}
