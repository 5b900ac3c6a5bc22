use std::collections::BTreeSet;

use crate::storage::RegistrySnapshot;
use crate::types::{Capability, NegotiationOutcome, NegotiationStatus, Parameters};

/// Parameters that count as supplied: present and not null.
pub fn supplied_keys(supplied: &Parameters) -> BTreeSet<&str> {
    supplied
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, _)| k.as_str())
        .collect()
}

/// Scores one capability against the supplied parameters.
pub fn score_capability(capability: &Capability, supplied: &Parameters) -> NegotiationOutcome {
    let keys = supplied_keys(supplied);

    let missing: BTreeSet<String> = capability
        .required_parameters
        .iter()
        .filter(|p| !keys.contains(p.as_str()))
        .cloned()
        .collect();
    let present = capability.required_parameters.len() - missing.len();

    let (match_score, status) = if capability.required_parameters.is_empty() {
        (1.0, NegotiationStatus::Full)
    } else {
        let score = present as f32 / capability.required_parameters.len() as f32;
        let status = if missing.is_empty() {
            NegotiationStatus::Full
        } else if present > 0 {
            NegotiationStatus::Partial
        } else {
            NegotiationStatus::None
        };
        (score, status)
    };

    let extra: BTreeSet<String> = keys
        .iter()
        .filter(|k| !capability.declares(k))
        .map(|k| k.to_string())
        .collect();

    NegotiationOutcome {
        agent_id: capability.agent_id.clone(),
        action: capability.action.clone(),
        match_score,
        missing_parameters: missing,
        extra_parameters: extra,
        status,
    }
}

/// Picks the agent best able to perform `action` with `supplied`.
///
/// The first capability in priority order that is fully satisfied wins.
/// Otherwise the highest-scoring one is returned as a best effort, ties going
/// to priority and then registration order. `None` when no agent advertises
/// the action at all.
pub fn negotiate(
    registry: &RegistrySnapshot,
    action: &str,
    supplied: &Parameters,
) -> Option<NegotiationOutcome> {
    let mut best: Option<NegotiationOutcome> = None;

    for capability in registry.lookup(action) {
        let outcome = score_capability(capability, supplied);
        if outcome.status == NegotiationStatus::Full {
            return Some(outcome);
        }
        let better = best
            .as_ref()
            .map_or(true, |b| outcome.match_score > b.match_score);
        if better {
            best = Some(outcome);
        }
    }

    best
}
