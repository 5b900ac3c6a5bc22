use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::fallback::{FallbackChain, ResolutionContext};
use crate::engine::matcher::SemanticMatcher;
use crate::engine::negotiator;
use crate::error::ResolveError;
use crate::providers::EmbeddingProvider;
use crate::storage::{CapabilityRegistry, IntentCatalog};
use crate::types::{
    MatchCandidate, NegotiationOutcome, Parameters, RequestEnvelope, ResolutionRequest,
    ResolutionResult,
};

/// Entry point for resolution. Owns the configuration and the fallback chain;
/// shares the catalog and registry with whoever manages them.
pub struct ResolutionEngine {
    config: EngineConfig,
    catalog: Arc<IntentCatalog>,
    registry: Arc<CapabilityRegistry>,
    matcher: SemanticMatcher,
    chain: FallbackChain,
}

impl ResolutionEngine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<IntentCatalog>,
        registry: Arc<CapabilityRegistry>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ResolveError> {
        config.validate()?;
        let matcher = SemanticMatcher::new(provider, config.embedding_timeout());

        Ok(Self {
            config,
            catalog,
            registry,
            matcher,
            chain: FallbackChain::standard(),
        })
    }

    /// Replaces the standard chain. The terminal graceful-failure stage is always kept.
    pub fn with_chain(mut self, chain: FallbackChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<IntentCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.matcher.provider_name()
    }

    pub async fn resolve(
        &self,
        utterance: &str,
        parameters: &Parameters,
    ) -> Result<ResolutionResult, ResolveError> {
        let request = ResolutionRequest::new(utterance).with_parameters(parameters.clone());
        self.resolve_request(&request).await
    }

    pub async fn resolve_envelope(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<ResolutionResult, ResolveError> {
        log::debug!(
            "resolving message {} from {} to {}",
            envelope.message_id,
            envelope.sender_platform,
            envelope.recipient_platform
        );
        self.resolve_request(&envelope.to_request()).await
    }

    /// Runs the fallback chain. Only malformed input is an error; every other
    /// outcome, including an unreachable embedding provider, is a result.
    pub async fn resolve_request(
        &self,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult, ResolveError> {
        request.validate()?;

        let catalog = self.catalog.snapshot();
        let registry = self.registry.snapshot();
        let mut ctx =
            ResolutionContext::new(request, &catalog, &registry, &self.config, &self.matcher);

        let result = self.chain.run(&mut ctx).await;
        log::info!(
            "resolved {:?} -> {} via {} (confidence {:.3})",
            request.text().or(request.action_token()).unwrap_or(""),
            result.action.as_deref().unwrap_or("-"),
            result.strategy_applied,
            result.confidence
        );
        Ok(result)
    }

    /// Negotiation against the current registry, independent of resolution.
    pub fn negotiate(&self, action: &str, parameters: &Parameters) -> Option<NegotiationOutcome> {
        negotiator::negotiate(&self.registry.snapshot(), action, parameters)
    }

    pub async fn match_intents(
        &self,
        utterance: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<MatchCandidate>, ResolveError> {
        let catalog = self.catalog.snapshot();
        self.matcher
            .match_intents(utterance, &catalog, top_k.unwrap_or(self.config.top_k))
            .await
    }

    /// Embeds every catalog entry still missing a vector, without the
    /// per-request timeout. Returns how many were embedded.
    pub async fn warm(&self) -> Result<usize, ResolveError> {
        let catalog = self.catalog.snapshot();
        self.matcher.warm(&catalog).await
    }
}
