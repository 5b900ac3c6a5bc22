use std::sync::Arc;
use std::time::Duration;

use crate::engine::similarity::{cosine_similarity, is_degenerate};
use crate::error::ResolveError;
use crate::providers::embedding::EmbeddingProvider;
use crate::storage::{CatalogSnapshot, IntentEntry};
use crate::types::{Intent, MatchCandidate};

/// Intents per provider call when warming the catalog.
const EMBED_CHUNK: usize = 8;

/// Ranks catalog intents against an utterance. Pure ranking: acceptance
/// thresholds are applied by the caller.
#[derive(Clone)]
pub struct SemanticMatcher {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl SemanticMatcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Top `top_k` candidates, best first; ties go to the earlier-registered intent.
    pub async fn match_intents(
        &self,
        utterance: &str,
        catalog: &CatalogSnapshot,
        top_k: usize,
    ) -> Result<Vec<MatchCandidate>, ResolveError> {
        if utterance.trim().is_empty() {
            return Err(ResolveError::MalformedRequest(
                "utterance must be non-empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(ResolveError::InvalidConfiguration(
                "top_k must be at least 1".to_string(),
            ));
        }
        if catalog.is_empty() {
            return Err(ResolveError::CatalogEmpty);
        }

        let query = self.embed(utterance).await?;
        self.ensure_embeddings(catalog).await?;
        Ok(Self::rank(&query, catalog, top_k, |_| true))
    }

    /// Embeds one text, bounded by the configured timeout.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ResolveError> {
        let embedding = tokio::time::timeout(self.timeout, self.provider.embed(text.trim()))
            .await
            .map_err(|_| {
                ResolveError::EmbeddingUnavailable(format!(
                    "{} timed out after {:?}",
                    self.provider.name(),
                    self.timeout
                ))
            })?
            .map_err(|e| ResolveError::EmbeddingUnavailable(format!("{}: {}", self.provider.name(), e)))?;

        if is_degenerate(&embedding) {
            return Err(ResolveError::EmbeddingUnavailable(format!(
                "{} returned a degenerate vector",
                self.provider.name()
            )));
        }
        Ok(embedding)
    }

    /// Fills any empty embedding slots in the snapshot, one intent per
    /// provider call. Each call is bounded by the timeout and fills its slot
    /// as soon as it returns, so a later failure keeps the earlier work.
    /// Concurrent callers may both compute an entry; the first assignment wins.
    pub async fn ensure_embeddings(&self, catalog: &CatalogSnapshot) -> Result<usize, ResolveError> {
        let pending = Self::pending(catalog);
        let mut filled = 0;
        for entry in &pending {
            let embedding = self
                .embed(&entry.intent().embedding_text())
                .await
                .map_err(|err| match err {
                    ResolveError::EmbeddingUnavailable(reason) => {
                        ResolveError::EmbeddingUnavailable(format!(
                            "{} ({} of {} intents embedded)",
                            reason,
                            filled,
                            pending.len()
                        ))
                    }
                    other => other,
                })?;
            entry.fill_embedding(embedding);
            filled += 1;
        }
        if filled > 0 {
            log::debug!("matcher: lazily embedded {} intents", filled);
        }
        Ok(filled)
    }

    /// Batch-embeds every empty slot with no timeout, chunk by chunk.
    /// Meant for start-up, off the request path.
    pub async fn warm(&self, catalog: &CatalogSnapshot) -> Result<usize, ResolveError> {
        let pending = Self::pending(catalog);
        let mut filled = 0;
        for chunk in pending.chunks(EMBED_CHUNK) {
            let texts: Vec<String> = chunk.iter().map(|e| e.intent().embedding_text()).collect();
            let embeddings = self
                .provider
                .embed_batch(&texts)
                .await
                .map_err(|e| ResolveError::EmbeddingUnavailable(format!("{}: {}", self.provider.name(), e)))?;

            if embeddings.len() != chunk.len() {
                return Err(ResolveError::EmbeddingUnavailable(format!(
                    "{} returned {} embeddings for {} intents",
                    self.provider.name(),
                    embeddings.len(),
                    chunk.len()
                )));
            }
            for (entry, embedding) in chunk.iter().zip(embeddings) {
                if is_degenerate(&embedding) {
                    return Err(ResolveError::EmbeddingUnavailable(format!(
                        "{} returned a degenerate embedding for intent `{}`",
                        self.provider.name(),
                        entry.intent().id
                    )));
                }
                entry.fill_embedding(embedding);
                filled += 1;
            }
        }
        log::info!("matcher: embedded {} intents", filled);
        Ok(filled)
    }

    fn pending(catalog: &CatalogSnapshot) -> Vec<&Arc<IntentEntry>> {
        catalog
            .entries()
            .iter()
            .filter(|e| e.embedding().is_none())
            .collect()
    }

    /// Scores every embedded intent accepted by `filter` against `query`.
    pub fn rank(
        query: &[f32],
        catalog: &CatalogSnapshot,
        top_k: usize,
        filter: impl Fn(&Intent) -> bool,
    ) -> Vec<MatchCandidate> {
        let mut scored: Vec<(usize, f32)> = catalog
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter(entry.intent()))
            .filter_map(|(position, entry)| {
                entry
                    .embedding()
                    .map(|embedding| (position, cosine_similarity(query, &embedding)))
            })
            .collect();

        scored.sort_by(|(pos_a, score_a), (pos_b, score_b)| {
            score_b.total_cmp(score_a).then(pos_a.cmp(pos_b))
        });

        scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (position, score))| MatchCandidate {
                intent_id: catalog.entries()[position].intent().id.clone(),
                similarity_score: score,
                rank: i + 1,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IntentCatalog;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps each known word to its own axis.
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    impl AxisEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0; 4];
            for word in text.to_lowercase().split_whitespace() {
                match word.trim_matches(|c: char| !c.is_alphanumeric()) {
                    "order" => v[0] += 1.0,
                    "cancel" => v[1] += 1.0,
                    "password" => v[2] += 1.0,
                    "weather" => v[3] += 1.0,
                    _ => {}
                }
            }
            Ok(v)
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1.0])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct EmptyEmbedder;

    #[async_trait]
    impl EmbeddingProvider for EmptyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    /// Healthy but slow: every call takes a fixed delay, and texts that
    /// mention `stall_on` never come back within a test timeout.
    struct LaggingEmbedder {
        delay: Duration,
        stall_on: Option<&'static str>,
        inner: AxisEmbedder,
    }

    impl LaggingEmbedder {
        fn new(delay: Duration, stall_on: Option<&'static str>) -> Self {
            Self {
                delay,
                stall_on,
                inner: AxisEmbedder::new(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LaggingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let stalls = self.stall_on.map_or(false, |word| text.contains(word));
            let delay = if stalls { Duration::from_secs(5) } else { self.delay };
            tokio::time::sleep(delay).await;
            let mut v = self.inner.embed(text).await?;
            v.push(1.0);
            Ok(v)
        }

        fn name(&self) -> &str {
            "lagging"
        }
    }

    struct NanEmbedder;

    #[async_trait]
    impl EmbeddingProvider for NanEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![f32::NAN, 1.0])
        }

        fn name(&self) -> &str {
            "nan"
        }
    }

    fn catalog() -> IntentCatalog {
        IntentCatalog::with_intents([
            Intent::new("track_order", "order", "order.track"),
            Intent::new("cancel_order", "cancel order", "order.cancel"),
            Intent::new("order_status", "order", "order.status"),
            Intent::new("reset_password", "password", "user.reset_password"),
        ])
        .unwrap()
    }

    fn matcher(provider: Arc<dyn EmbeddingProvider>) -> SemanticMatcher {
        SemanticMatcher::new(provider, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_ranks_descending_with_registration_tiebreak() {
        let catalog = catalog();
        let matcher = matcher(Arc::new(AxisEmbedder::new()));

        let candidates = matcher
            .match_intents("my order", &catalog.snapshot(), 3)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].intent_id, "track_order");
        assert_eq!(candidates[1].intent_id, "order_status");
        assert_eq!(candidates[2].intent_id, "cancel_order");
        assert!((candidates[0].similarity_score - 1.0).abs() < 1e-6);
        assert_eq!(
            candidates.iter().map(|c| c.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_zero_vector_utterance_scores_zero() {
        let catalog = catalog();
        let matcher = matcher(Arc::new(AxisEmbedder::new()));

        let candidates = matcher
            .match_intents("hello there", &catalog.snapshot(), 10)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 4);
        assert!(candidates.iter().all(|c| c.similarity_score == 0.0));
        assert_eq!(candidates[0].intent_id, "track_order");
    }

    #[tokio::test]
    async fn test_embeddings_cached_after_first_match() {
        let catalog = catalog();
        let provider = Arc::new(AxisEmbedder::new());
        let matcher = matcher(provider.clone());
        let snapshot = catalog.snapshot();

        matcher.match_intents("order", &snapshot, 1).await.unwrap();
        let after_first = provider.calls.load(Ordering::SeqCst);
        matcher.match_intents("order", &snapshot, 1).await.unwrap();

        assert_eq!(after_first, 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
        assert_eq!(snapshot.missing_embeddings(), 0);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_reported() {
        let matcher = matcher(Arc::new(AxisEmbedder::new()));
        let err = matcher
            .match_intents("order", &IntentCatalog::new().snapshot(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CatalogEmpty));
    }

    #[tokio::test]
    async fn test_input_constraints() {
        let catalog = catalog();
        let matcher = matcher(Arc::new(AxisEmbedder::new()));
        let snapshot = catalog.snapshot();

        assert!(matches!(
            matcher.match_intents("   ", &snapshot, 5).await,
            Err(ResolveError::MalformedRequest(_))
        ));
        assert!(matches!(
            matcher.match_intents("order", &snapshot, 0).await,
            Err(ResolveError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_embedding_unavailable() {
        let catalog = catalog();
        let matcher = matcher(Arc::new(SlowEmbedder));
        let err = matcher
            .match_intents("order", &catalog.snapshot(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_degenerate_vector_maps_to_embedding_unavailable() {
        let matcher = matcher(Arc::new(EmptyEmbedder));
        let err = matcher.embed("order").await.unwrap_err();
        assert!(matches!(err, ResolveError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_rank_with_filter() {
        let catalog = catalog();
        let matcher = matcher(Arc::new(AxisEmbedder::new()));
        let snapshot = catalog.snapshot();
        matcher.ensure_embeddings(&snapshot).await.unwrap();

        let query = vec![1.0, 0.0, 0.0, 0.0];
        let ranked = SemanticMatcher::rank(&query, &snapshot, 5, |i| i.category() == "user");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].intent_id, "reset_password");
        assert_eq!(ranked[0].similarity_score, 0.0);
    }

    #[tokio::test]
    async fn test_large_catalog_fills_under_short_timeout() {
        let catalog = IntentCatalog::with_intents((0..31).map(|i| {
            Intent::new(
                format!("intent_{}", i),
                format!("order variant {}", i),
                format!("order.variant_{}", i),
            )
        }))
        .unwrap();
        let provider = Arc::new(LaggingEmbedder::new(Duration::from_millis(10), None));
        let matcher = matcher(provider);
        let snapshot = catalog.snapshot();

        let candidates = matcher
            .match_intents("where is my order", &snapshot, 3)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 3);
        assert_eq!(snapshot.missing_embeddings(), 0);
    }

    #[tokio::test]
    async fn test_timeout_keeps_embeddings_filled_before_it() {
        let catalog = IntentCatalog::with_intents([
            Intent::new("track_order", "order", "order.track"),
            Intent::new("cancel_order", "cancel order", "order.cancel"),
            Intent::new("forecast", "weather", "weather.forecast"),
            Intent::new("reset_password", "password", "user.reset_password"),
        ])
        .unwrap();
        let provider = Arc::new(LaggingEmbedder::new(Duration::from_millis(1), Some("weather")));
        let matcher = matcher(provider);
        let snapshot = catalog.snapshot();

        let err = matcher.ensure_embeddings(&snapshot).await.unwrap_err();

        assert!(matches!(err, ResolveError::EmbeddingUnavailable(ref r) if r.contains("2 of 4")));
        assert!(snapshot.get("track_order").unwrap().embedding().is_some());
        assert!(snapshot.get("cancel_order").unwrap().embedding().is_some());
        assert_eq!(snapshot.missing_embeddings(), 2);
    }

    #[tokio::test]
    async fn test_warm_ignores_request_timeout() {
        let catalog = catalog();
        let provider = Arc::new(LaggingEmbedder::new(Duration::from_millis(30), None));
        let matcher = SemanticMatcher::new(provider, Duration::from_millis(20));
        let snapshot = catalog.snapshot();

        assert_eq!(matcher.warm(&snapshot).await.unwrap(), 4);
        assert_eq!(snapshot.missing_embeddings(), 0);
        assert_eq!(matcher.warm(&snapshot).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_embeddings_are_never_cached() {
        let catalog = catalog();
        let matcher = matcher(Arc::new(NanEmbedder));
        let snapshot = catalog.snapshot();

        assert!(matches!(
            matcher.warm(&snapshot).await,
            Err(ResolveError::EmbeddingUnavailable(_))
        ));
        assert!(matches!(
            matcher.ensure_embeddings(&snapshot).await,
            Err(ResolveError::EmbeddingUnavailable(_))
        ));
        assert_eq!(snapshot.missing_embeddings(), 4);
    }
}
