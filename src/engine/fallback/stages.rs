use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{Resolved, ResolutionContext, ResolutionStage, StageOutcome};
use crate::engine::matcher::SemanticMatcher;
use crate::engine::negotiator::negotiate;
use crate::types::{normalize_token, NegotiationStatus, ResolutionStatus, Strategy};

/// Literal, case-insensitive lookup of the action token and the utterance
/// against intent ids, intent target actions and advertised actions.
pub struct ExactMatch;

#[async_trait]
impl ResolutionStage for ExactMatch {
    fn strategy(&self) -> Strategy {
        Strategy::ExactMatch
    }

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome {
        let tokens: Vec<&str> = [ctx.request.action_token(), ctx.request.text()]
            .into_iter()
            .flatten()
            .collect();

        let mut rejections = Vec::new();
        for token in &tokens {
            let (action, source) = if let Some(entry) = ctx.catalog.find_literal(token) {
                (
                    entry.intent().target_action.clone(),
                    format!("`{}` names intent `{}`", token, entry.intent().id),
                )
            } else if let Some(action) = ctx.registry.find_action(token) {
                (
                    action.to_string(),
                    format!("`{}` names advertised action `{}`", token, action),
                )
            } else {
                continue;
            };

            match ctx.bind(&action, 1.0) {
                Ok(resolved) => return StageOutcome::resolve(resolved, Some(1.0), source),
                Err(reason) => rejections.push(format!("{}, but {}", source, reason)),
            }
        }

        if rejections.is_empty() {
            StageOutcome::defer(format!(
                "no intent or action named {}",
                tokens
                    .iter()
                    .map(|t| format!("`{}`", t))
                    .collect::<Vec<_>>()
                    .join(" or ")
            ))
        } else {
            StageOutcome::defer(rejections.join("; "))
        }
    }
}

/// Embedding similarity against the whole catalog; accepts the top candidate
/// at `similarity_threshold`.
pub struct SemanticMatch;

#[async_trait]
impl ResolutionStage for SemanticMatch {
    fn strategy(&self) -> Strategy {
        Strategy::SemanticMatch
    }

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome {
        if ctx.request.text().is_none() {
            return StageOutcome::defer("no utterance to match");
        }
        if ctx.catalog.is_empty() {
            return StageOutcome::defer("catalog empty");
        }

        let query = match ctx.query_embedding().await {
            Ok(query) => query,
            Err(err) => return StageOutcome::defer(format!("skipped: {}", err)),
        };
        if let Err(err) = ctx.ensure_catalog_embeddings().await {
            return StageOutcome::defer(format!("skipped: {}", err));
        }

        let candidates = SemanticMatcher::rank(&query, ctx.catalog, ctx.config.top_k, |_| true);
        ctx.record_candidates(candidates.clone());

        let top = match candidates.first() {
            Some(top) => top,
            None => return StageOutcome::defer("no embedded intents to rank"),
        };
        let intent = match ctx.catalog.get(&top.intent_id) {
            Some(entry) => entry.intent(),
            None => return StageOutcome::defer("top candidate vanished from snapshot"),
        };

        let threshold = ctx.config.similarity_threshold;
        if top.similarity_score < threshold {
            return StageOutcome::defer_with_score(
                top.similarity_score,
                format!(
                    "top candidate `{}` below similarity threshold {:.2}",
                    intent.id, threshold
                ),
            );
        }

        let detail = format!(
            "top candidate `{}` of {} at or above {:.2}",
            intent.id,
            candidates.len(),
            threshold
        );
        match ctx.bind(&intent.target_action, top.similarity_score) {
            Ok(resolved) => StageOutcome::resolve(resolved, Some(top.similarity_score), detail),
            Err(reason) => StageOutcome::defer_with_score(
                top.similarity_score,
                format!("{}, but {}", detail, reason),
            ),
        }
    }
}

/// Rescues a weaker semantic candidate when an agent is fully satisfied by the
/// supplied parameters.
pub struct ParameterAdaptation;

#[async_trait]
impl ResolutionStage for ParameterAdaptation {
    fn strategy(&self) -> Strategy {
        Strategy::ParameterAdaptation
    }

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome {
        if ctx.candidates().is_empty() {
            return StageOutcome::defer("no semantic candidates to adapt");
        }

        let considerable = ctx.config.considerable_threshold;
        let mut considered = 0;
        for candidate in ctx.candidates() {
            if candidate.similarity_score < considerable {
                break;
            }
            let Some(entry) = ctx.catalog.get(&candidate.intent_id) else {
                continue;
            };
            considered += 1;

            let action = &entry.intent().target_action;
            let full = negotiate(ctx.registry, action, &ctx.request.parameters)
                .is_some_and(|o| o.status == NegotiationStatus::Full);
            if !full {
                continue;
            }

            if let Ok(resolved) = ctx.bind(action, candidate.similarity_score) {
                return StageOutcome::resolve(
                    resolved,
                    Some(candidate.similarity_score),
                    format!(
                        "candidate `{}` (rank {}) rescued by full parameter coverage",
                        candidate.intent_id, candidate.rank
                    ),
                );
            }
        }

        if considered == 0 {
            StageOutcome::defer(format!(
                "no candidate at or above considerable threshold {:.2}",
                considerable
            ))
        } else {
            StageOutcome::defer(format!(
                "none of {} considerable candidates fully satisfied by an agent",
                considered
            ))
        }
    }
}

/// Re-ranks within a single intent category with a relaxed threshold.
pub struct IntentApproximation;

impl IntentApproximation {
    /// Category to search in, and where it came from.
    fn anchor(ctx: &ResolutionContext<'_>) -> Option<(String, &'static str)> {
        if let Some(hint) = ctx.request.category_hint.as_deref() {
            if ctx.catalog.has_category(hint) {
                return Some((hint.to_string(), "category hint"));
            }
        }

        if let Some(token) = ctx.request.action_token() {
            let prefix = token.split('.').next().unwrap_or(token);
            if ctx.catalog.has_category(prefix) {
                return Some((prefix.to_string(), "action token"));
            }
        }

        ctx.best_candidate()
            .and_then(|best| ctx.catalog.get(&best.intent_id))
            .map(|entry| (entry.intent().category().to_string(), "best candidate"))
    }
}

#[async_trait]
impl ResolutionStage for IntentApproximation {
    fn strategy(&self) -> Strategy {
        Strategy::IntentApproximation
    }

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome {
        if ctx.catalog.is_empty() {
            return StageOutcome::defer("catalog empty");
        }
        if ctx.request.text().is_none() {
            return StageOutcome::defer("no utterance to approximate");
        }
        let Some((category, source)) = Self::anchor(ctx) else {
            return StageOutcome::defer("no category to anchor on");
        };

        let query = match ctx.query_embedding().await {
            Ok(query) => query,
            Err(err) => return StageOutcome::defer(format!("skipped: {}", err)),
        };
        if let Err(err) = ctx.ensure_catalog_embeddings().await {
            return StageOutcome::defer(format!("skipped: {}", err));
        }

        let wanted = normalize_token(&category);
        let ranked = SemanticMatcher::rank(&query, ctx.catalog, 1, |intent| {
            normalize_token(intent.category()) == wanted
        });
        let Some(top) = ranked.first() else {
            return StageOutcome::defer(format!("category `{}` has no embedded intents", category));
        };
        let Some(entry) = ctx.catalog.get(&top.intent_id) else {
            return StageOutcome::defer("candidate vanished from snapshot");
        };

        let threshold = ctx.config.effective_approximation_threshold();
        let detail = format!(
            "best in category `{}` (from {}) is `{}`",
            category, source, top.intent_id
        );
        if top.similarity_score < threshold {
            return StageOutcome::defer_with_score(
                top.similarity_score,
                format!("{}, below relaxed threshold {:.2}", detail, threshold),
            );
        }

        match ctx.bind(&entry.intent().target_action, top.similarity_score) {
            Ok(resolved) => StageOutcome::resolve(resolved, Some(top.similarity_score), detail),
            Err(reason) => StageOutcome::defer_with_score(
                top.similarity_score,
                format!("{}, but {}", detail, reason),
            ),
        }
    }
}

/// Terminal stage. Always produces an `unmatched` result carrying the best
/// score seen and suggested alternatives.
pub struct GracefulFailure;

impl GracefulFailure {
    pub fn conclude(&self, ctx: &ResolutionContext<'_>) -> (Resolved, String) {
        let mut seen = BTreeSet::new();
        let suggestions: Vec<String> = ctx
            .candidates()
            .iter()
            .filter(|c| c.similarity_score > 0.0)
            .filter_map(|c| ctx.catalog.get(&c.intent_id))
            .map(|entry| entry.intent().target_action.clone())
            .filter(|action| seen.insert(action.clone()))
            .take(ctx.config.max_suggestions)
            .collect();

        let mut detail = String::from("no stage resolved the request");
        if ctx.catalog.is_empty() {
            detail.push_str("; catalog empty");
        }
        if let Some(reason) = ctx.embedding_failure() {
            detail.push_str(&format!("; embedding unavailable: {}", reason));
        }
        if !suggestions.is_empty() {
            detail.push_str(&format!("; closest actions: {}", suggestions.join(", ")));
        }
        detail.push_str("; escalate for review");

        let resolved = Resolved {
            status: ResolutionStatus::Unmatched,
            action: None,
            agent_id: None,
            confidence: ctx.best_score().unwrap_or(0.0),
            bound_parameters: ctx.request.parameters.clone(),
            missing_parameters: BTreeSet::new(),
            components: Vec::new(),
            suggestions,
            note: String::new(),
        };
        (resolved, detail)
    }
}

#[async_trait]
impl ResolutionStage for GracefulFailure {
    fn strategy(&self) -> Strategy {
        Strategy::GracefulFailure
    }

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome {
        let (resolved, detail) = self.conclude(ctx);
        let score = ctx.best_score();
        StageOutcome::resolve(resolved, score, detail)
    }
}
