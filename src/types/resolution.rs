use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{ActionId, AgentId, Parameters, ResolutionStatus, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageVerdict {
    Resolved,
    Deferred,
}

/// One trace entry per executed stage, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Strategy,
    pub verdict: StageVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.verdict {
            StageVerdict::Resolved => "resolved",
            StageVerdict::Deferred => "deferred",
        };
        match self.score {
            Some(score) => write!(
                f,
                "{}: {} (score {:.3}): {}",
                self.stage, verdict, score, self.detail
            ),
            None => write!(f, "{}: {}: {}", self.stage, verdict, self.detail),
        }
    }
}

/// Sub-resolution of one span of a decomposed utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionComponent {
    pub span: String,
    pub status: ResolutionStatus,
    pub action: Option<ActionId>,
    pub agent_id: Option<AgentId>,
    pub confidence: f32,
    pub strategy_applied: Strategy,
    pub missing_parameters: BTreeSet<String>,
}

/// Terminal output of one resolution. A value: built once, never mutated after return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub status: ResolutionStatus,
    pub action: Option<ActionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub confidence: f32,
    pub bound_parameters: Parameters,
    pub missing_parameters: BTreeSet<String>,
    pub strategy_applied: Strategy,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<ActionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ResolutionComponent>,
}

impl ResolutionResult {
    pub fn is_matched(&self) -> bool {
        self.status == ResolutionStatus::Matched
    }

    pub fn is_unmatched(&self) -> bool {
        self.status == ResolutionStatus::Unmatched
    }

    /// Diagnostics rendered one line per stage.
    pub fn trace(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_with_score() {
        let entry = Diagnostic {
            stage: Strategy::SemanticMatch,
            verdict: StageVerdict::Deferred,
            score: Some(0.61234),
            detail: "below threshold 0.750".to_string(),
        };
        assert_eq!(
            entry.to_string(),
            "semantic_match: deferred (score 0.612): below threshold 0.750"
        );
    }

    #[test]
    fn test_diagnostic_display_without_score() {
        let entry = Diagnostic {
            stage: Strategy::ExactMatch,
            verdict: StageVerdict::Resolved,
            score: None,
            detail: "intent id `check_order_status`".to_string(),
        };
        assert_eq!(
            entry.to_string(),
            "exact_match: resolved: intent id `check_order_status`"
        );
    }
}
