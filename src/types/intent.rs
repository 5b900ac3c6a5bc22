use serde::{Deserialize, Serialize};

use super::{ActionId, IntentId};

/// A catalogued meaning. The embedding is not part of the declaration; the
/// catalog owns it in a per-entry slot (see `catalog::IntentEntry`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub canonical_description: String,
    #[serde(default)]
    pub example_phrasings: Vec<String>,
    pub target_action: ActionId,
    /// Declared category. When absent the dotted prefix of `target_action` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Intent {
    pub fn new(
        id: impl Into<String>,
        canonical_description: impl Into<String>,
        target_action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            canonical_description: canonical_description.into(),
            example_phrasings: Vec::new(),
            target_action: target_action.into(),
            category: None,
        }
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.example_phrasings = examples.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn category(&self) -> &str {
        match &self.category {
            Some(category) => category,
            None => self
                .target_action
                .split('.')
                .next()
                .unwrap_or(&self.target_action),
        }
    }

    /// Text handed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        if self.example_phrasings.is_empty() {
            self.canonical_description.clone()
        } else {
            format!(
                "{}. Examples: {}",
                self.canonical_description,
                self.example_phrasings.join(" | ")
            )
        }
    }

    /// True when the two declarations embed to the same text.
    pub fn same_embedding_source(&self, other: &Intent) -> bool {
        self.canonical_description == other.canonical_description
            && self.example_phrasings == other.example_phrasings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub intent_id: IntentId,
    pub similarity_score: f32,
    /// 1-based position in the ranking.
    pub rank: usize,
}
