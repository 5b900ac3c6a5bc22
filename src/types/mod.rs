pub mod capability;
pub mod intent;
pub mod request;
pub mod resolution;

pub use capability::{Capability, NegotiationOutcome};
pub use intent::{Intent, MatchCandidate};
pub use request::{RequestEnvelope, ResolutionRequest};
pub use resolution::{Diagnostic, ResolutionComponent, ResolutionResult, StageVerdict};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type IntentId = String;
pub type AgentId = String;
pub type ActionId = String;

/// Supplied or bound request parameters. Ordered so results serialize the same way every time.
pub type Parameters = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Matched,
    Partial,
    Unmatched,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Matched => "matched",
            ResolutionStatus::Partial => "partial",
            ResolutionStatus::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Full,
    Partial,
    None,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Full => "full",
            NegotiationStatus::Partial => "partial",
            NegotiationStatus::None => "none",
        }
    }
}

/// Fallback stages, in chain order. `Direct` is reported when a primary stage
/// (`exact_match` or `semantic_match`) produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[serde(rename = "none")]
    Direct,
    ExactMatch,
    SemanticMatch,
    ParameterAdaptation,
    IntentApproximation,
    IntentDecomposition,
    GracefulFailure,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "none",
            Strategy::ExactMatch => "exact_match",
            Strategy::SemanticMatch => "semantic_match",
            Strategy::ParameterAdaptation => "parameter_adaptation",
            Strategy::IntentApproximation => "intent_approximation",
            Strategy::IntentDecomposition => "intent_decomposition",
            Strategy::GracefulFailure => "graceful_failure",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Strategy::ExactMatch | Strategy::SemanticMatch)
    }

    /// Name reported in `strategy_applied` when this stage resolves a request.
    pub fn applied(self) -> Strategy {
        if self.is_primary() {
            Strategy::Direct
        } else {
            self
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalizes an identifier or short utterance for literal comparison:
/// lowercase, with whitespace, `_` and `-` runs collapsed to a single `_`.
pub fn normalize_token(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.trim().chars() {
        if c.is_whitespace() || c == '_' || c == '-' {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('_');
            pending_sep = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}
