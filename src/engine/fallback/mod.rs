//! The ordered degradation chain.
//!
//! Each stage either resolves the request or defers to the next one. The chain
//! ends with [`GracefulFailure`], which cannot defer, so every request terminates
//! with a well-formed [`ResolutionResult`].

pub mod decomposition;
pub mod stages;

pub use decomposition::{IntentDecomposition, RegexSpanSplitter, SpanSplitter};
pub use stages::{ExactMatch, GracefulFailure, IntentApproximation, ParameterAdaptation, SemanticMatch};

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::config::EngineConfig;
use crate::engine::matcher::SemanticMatcher;
use crate::engine::negotiator::negotiate;
use crate::error::ResolveError;
use crate::storage::{CatalogSnapshot, RegistrySnapshot};
use crate::types::{
    AgentId, Diagnostic, MatchCandidate, NegotiationStatus, Parameters, ResolutionComponent,
    ResolutionRequest, ResolutionResult, ResolutionStatus, StageVerdict, Strategy,
};

/// Per-request state threaded through the stages. Holds the registry and
/// catalog snapshots taken at request start.
pub struct ResolutionContext<'a> {
    pub request: &'a ResolutionRequest,
    pub catalog: &'a CatalogSnapshot,
    pub registry: &'a RegistrySnapshot,
    pub config: &'a EngineConfig,
    pub matcher: &'a SemanticMatcher,
    query_embedding: Option<Vec<f32>>,
    candidates: Vec<MatchCandidate>,
    best: Option<MatchCandidate>,
    best_score: Option<f32>,
    embedding_failure: Option<String>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(
        request: &'a ResolutionRequest,
        catalog: &'a CatalogSnapshot,
        registry: &'a RegistrySnapshot,
        config: &'a EngineConfig,
        matcher: &'a SemanticMatcher,
    ) -> Self {
        Self {
            request,
            catalog,
            registry,
            config,
            matcher,
            query_embedding: None,
            candidates: Vec::new(),
            best: None,
            best_score: None,
            embedding_failure: None,
        }
    }

    /// Context for one span of a decomposed request. Inherits a provider
    /// failure so the provider is not called again for this request.
    pub fn for_span(
        request: &'a ResolutionRequest,
        config: &'a EngineConfig,
        parent: &ResolutionContext<'a>,
    ) -> Self {
        let mut ctx = Self::new(request, parent.catalog, parent.registry, config, parent.matcher);
        ctx.embedding_failure = parent.embedding_failure.clone();
        ctx
    }

    /// Pulls a span context's provider failure back into this one.
    pub fn absorb_span(&mut self, span: &ResolutionContext<'_>) {
        if self.embedding_failure.is_none() {
            self.embedding_failure = span.embedding_failure.clone();
        }
    }

    pub fn candidates(&self) -> &[MatchCandidate] {
        &self.candidates
    }

    pub fn best_candidate(&self) -> Option<&MatchCandidate> {
        self.best.as_ref()
    }

    pub fn best_score(&self) -> Option<f32> {
        self.best_score
    }

    pub fn embedding_failure(&self) -> Option<&str> {
        self.embedding_failure.as_deref()
    }

    pub fn observe_score(&mut self, score: f32) {
        if self.best_score.map_or(true, |best| score > best) {
            self.best_score = Some(score);
        }
    }

    /// Records ranked candidates and tracks the best one seen so far.
    pub fn record_candidates(&mut self, candidates: Vec<MatchCandidate>) {
        if let Some(top) = candidates.first() {
            let better = self
                .best
                .as_ref()
                .map_or(true, |b| top.similarity_score > b.similarity_score);
            if better {
                self.best = Some(top.clone());
            }
            self.observe_score(top.similarity_score);
        }
        self.candidates = candidates;
    }

    /// Embedding of the request text, computed at most once per request.
    pub async fn query_embedding(&mut self) -> Result<Vec<f32>, ResolveError> {
        if let Some(reason) = &self.embedding_failure {
            return Err(ResolveError::EmbeddingUnavailable(reason.clone()));
        }
        if let Some(embedding) = &self.query_embedding {
            return Ok(embedding.clone());
        }
        let request = self.request;
        let matcher = self.matcher;
        let text = request
            .text()
            .ok_or_else(|| ResolveError::MalformedRequest("no utterance to embed".to_string()))?;
        match matcher.embed(text).await {
            Ok(embedding) => {
                self.query_embedding = Some(embedding.clone());
                Ok(embedding)
            }
            Err(err) => {
                self.note_embedding_failure(&err);
                Err(err)
            }
        }
    }

    /// Makes sure every catalog entry carries an embedding.
    pub async fn ensure_catalog_embeddings(&mut self) -> Result<(), ResolveError> {
        if let Some(reason) = &self.embedding_failure {
            return Err(ResolveError::EmbeddingUnavailable(reason.clone()));
        }
        let (matcher, catalog) = (self.matcher, self.catalog);
        if let Err(err) = matcher.ensure_embeddings(catalog).await {
            self.note_embedding_failure(&err);
            return Err(err);
        }
        Ok(())
    }

    fn note_embedding_failure(&mut self, err: &ResolveError) {
        if let ResolveError::EmbeddingUnavailable(reason) = err {
            log::warn!("embedding provider unavailable, skipping semantic stages: {}", reason);
            self.embedding_failure = Some(reason.clone());
        }
    }

    /// Negotiates `action` and turns the outcome into a resolution, or a reason to defer.
    pub fn bind(&self, action: &str, confidence: f32) -> Result<Resolved, String> {
        let supplied = &self.request.parameters;
        match negotiate(self.registry, action, supplied) {
            None => Ok(Resolved {
                status: ResolutionStatus::Matched,
                action: Some(action.to_string()),
                agent_id: None,
                confidence,
                bound_parameters: supplied.clone(),
                missing_parameters: BTreeSet::new(),
                components: Vec::new(),
                suggestions: Vec::new(),
                note: format!("no agent advertises `{}`", action),
            }),
            Some(outcome) if outcome.status == NegotiationStatus::None => Err(format!(
                "agent `{}` cannot perform `{}`: none of {} required parameters supplied",
                outcome.agent_id,
                action,
                outcome.missing_parameters.len()
            )),
            Some(outcome) => {
                let capability = self.registry.get(&outcome.agent_id, action);
                let bound_parameters: Parameters = supplied
                    .iter()
                    .filter(|(k, _)| capability.map_or(true, |c| c.declares(k)))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let status = match outcome.status {
                    NegotiationStatus::Full => ResolutionStatus::Matched,
                    _ => ResolutionStatus::Partial,
                };
                let mut note = format!(
                    "negotiated with `{}` ({}, score {:.2})",
                    outcome.agent_id,
                    outcome.status.as_str(),
                    outcome.match_score
                );
                if !outcome.extra_parameters.is_empty() {
                    note.push_str(&format!(
                        "; ignoring undeclared parameters: {}",
                        join(&outcome.extra_parameters)
                    ));
                }
                Ok(Resolved {
                    status,
                    action: Some(action.to_string()),
                    agent_id: Some(outcome.agent_id),
                    confidence,
                    bound_parameters,
                    missing_parameters: outcome.missing_parameters,
                    components: Vec::new(),
                    suggestions: Vec::new(),
                    note,
                })
            }
        }
    }
}

pub(crate) fn join(items: &BTreeSet<String>) -> String {
    items.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// A stage's accepted answer, before the chain stamps strategy and diagnostics on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub status: ResolutionStatus,
    pub action: Option<String>,
    pub agent_id: Option<AgentId>,
    pub confidence: f32,
    pub bound_parameters: Parameters,
    pub missing_parameters: BTreeSet<String>,
    pub components: Vec<ResolutionComponent>,
    pub suggestions: Vec<String>,
    /// Appended to the stage's diagnostic entry.
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub resolution: Option<Resolved>,
    pub score: Option<f32>,
    pub detail: String,
}

impl StageOutcome {
    pub fn defer(detail: impl Into<String>) -> Self {
        Self {
            resolution: None,
            score: None,
            detail: detail.into(),
        }
    }

    pub fn defer_with_score(score: f32, detail: impl Into<String>) -> Self {
        Self {
            resolution: None,
            score: Some(score),
            detail: detail.into(),
        }
    }

    pub fn resolve(resolved: Resolved, score: Option<f32>, detail: impl Into<String>) -> Self {
        Self {
            resolution: Some(resolved),
            score,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait ResolutionStage: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome;
}

fn diagnostic(strategy: Strategy, outcome: &StageOutcome) -> Diagnostic {
    let (verdict, detail) = match &outcome.resolution {
        Some(resolved) if !resolved.note.is_empty() => (
            StageVerdict::Resolved,
            format!("{}; {}", outcome.detail, resolved.note),
        ),
        Some(_) => (StageVerdict::Resolved, outcome.detail.clone()),
        None => (StageVerdict::Deferred, outcome.detail.clone()),
    };
    Diagnostic {
        stage: strategy,
        verdict,
        score: outcome.score,
        detail,
    }
}

/// Runs stages strictly in order and stops at the first one that resolves.
pub struct FallbackChain {
    stages: Vec<Box<dyn ResolutionStage>>,
    terminal: GracefulFailure,
}

impl FallbackChain {
    pub fn new(stages: Vec<Box<dyn ResolutionStage>>) -> Self {
        Self {
            stages,
            terminal: GracefulFailure,
        }
    }

    /// exact_match, semantic_match, parameter_adaptation, intent_approximation,
    /// intent_decomposition, then graceful_failure.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ExactMatch),
            Box::new(SemanticMatch),
            Box::new(ParameterAdaptation),
            Box::new(IntentApproximation),
            Box::new(IntentDecomposition::default()),
        ])
    }

    pub fn strategies(&self) -> Vec<Strategy> {
        self.stages
            .iter()
            .map(|s| s.strategy())
            .chain(std::iter::once(Strategy::GracefulFailure))
            .collect()
    }

    /// Runs the deferrable stages only. Returns the resolving stage, if any,
    /// and one diagnostic per executed stage.
    pub async fn run_stages(
        &self,
        ctx: &mut ResolutionContext<'_>,
    ) -> (Option<(Strategy, Resolved)>, Vec<Diagnostic>) {
        let mut diagnostics = Vec::with_capacity(self.stages.len() + 1);

        for stage in &self.stages {
            let strategy = stage.strategy();
            let outcome = stage.attempt(ctx).await;
            if let Some(score) = outcome.score {
                ctx.observe_score(score);
            }
            diagnostics.push(diagnostic(strategy, &outcome));

            match outcome.resolution {
                Some(resolved) => {
                    log::info!(
                        "{} resolved `{}` to {:?} ({})",
                        strategy,
                        ctx.request.text().or(ctx.request.action_token()).unwrap_or(""),
                        resolved.action,
                        resolved.status.as_str()
                    );
                    return (Some((strategy, resolved)), diagnostics);
                }
                None => log::debug!("{} deferred: {}", strategy, outcome.detail),
            }
        }

        (None, diagnostics)
    }

    pub async fn run(&self, ctx: &mut ResolutionContext<'_>) -> ResolutionResult {
        let (resolved, mut diagnostics) = self.run_stages(ctx).await;

        let (strategy, resolved) = match resolved {
            Some(found) => found,
            None => {
                let (resolved, detail) = self.terminal.conclude(ctx);
                log::info!("graceful_failure: {}", detail);
                diagnostics.push(Diagnostic {
                    stage: Strategy::GracefulFailure,
                    verdict: StageVerdict::Resolved,
                    score: ctx.best_score(),
                    detail,
                });
                (Strategy::GracefulFailure, resolved)
            }
        };

        let mut bound_parameters = resolved.bound_parameters;
        for (key, value) in &ctx.request.passthrough {
            bound_parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        ResolutionResult {
            status: resolved.status,
            action: resolved.action,
            agent_id: resolved.agent_id,
            confidence: resolved.confidence,
            bound_parameters,
            missing_parameters: resolved.missing_parameters,
            strategy_applied: strategy.applied(),
            diagnostics,
            suggestions: resolved.suggestions,
            components: resolved.components,
        }
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::standard()
    }
}
