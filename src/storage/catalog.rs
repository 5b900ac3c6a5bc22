use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::ResolveError;
use crate::types::{normalize_token, Intent};

/// A catalogued intent plus its write-once embedding slot.
#[derive(Debug)]
pub struct IntentEntry {
    intent: Intent,
    embedding: Arc<OnceLock<Arc<[f32]>>>,
}

impl IntentEntry {
    fn new(intent: Intent) -> Self {
        Self {
            intent,
            embedding: Arc::new(OnceLock::new()),
        }
    }

    fn with_slot(intent: Intent, slot: Arc<OnceLock<Arc<[f32]>>>) -> Self {
        Self {
            intent,
            embedding: slot,
        }
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn embedding(&self) -> Option<Arc<[f32]>> {
        self.embedding.get().cloned()
    }

    /// Fills the slot if still empty and returns whichever value won.
    pub fn fill_embedding(&self, embedding: Vec<f32>) -> Arc<[f32]> {
        let _ = self.embedding.set(Arc::from(embedding));
        match self.embedding.get() {
            Some(winner) => winner.clone(),
            None => Arc::from(Vec::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn shares_slot_with(&self, other: &IntentEntry) -> bool {
        Arc::ptr_eq(&self.embedding, &other.embedding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    Inserted,
    Unchanged,
    /// Declaration changed but kept its embedding (same description and phrasings).
    Updated,
    /// Embedding source changed; the entry will be re-embedded.
    Reembedding,
}

/// Immutable view of the catalog, in registration order.
#[derive(Debug, Default, Clone)]
pub struct CatalogSnapshot {
    entries: Vec<Arc<IntentEntry>>,
    index: HashMap<String, usize>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<IntentEntry>] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&Arc<IntentEntry>> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    /// Registration position, used as the ranking tie-break.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.entries.iter().map(|e| e.intent.clone()).collect()
    }

    /// Intents whose id or target action equals `token` under `normalize_token`.
    pub fn find_literal(&self, token: &str) -> Option<&Arc<IntentEntry>> {
        let wanted = normalize_token(token);
        if wanted.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| normalize_token(&e.intent.id) == wanted)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| normalize_token(&e.intent.target_action) == wanted)
            })
    }

    pub fn has_category(&self, category: &str) -> bool {
        let wanted = normalize_token(category);
        self.entries
            .iter()
            .any(|e| normalize_token(e.intent.category()) == wanted)
    }

    pub fn missing_embeddings(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.embedding().is_none())
            .count()
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.intent.id.clone(), i))
            .collect();
    }
}

/// Shared intent registry. Readers take a snapshot; writers swap in a new one.
#[derive(Debug, Default)]
pub struct IntentCatalog {
    state: RwLock<Arc<CatalogSnapshot>>,
}

impl IntentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intents(intents: impl IntoIterator<Item = Intent>) -> Result<Self, ResolveError> {
        let catalog = Self::new();
        for intent in intents {
            catalog.register(intent)?;
        }
        Ok(catalog)
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Intent> {
        self.snapshot().get(id).map(|e| e.intent.clone())
    }

    /// Inserts a new intent or replaces an existing one with the same id.
    /// Replacing keeps the original registration position.
    pub fn register(&self, intent: Intent) -> Result<Registration, ResolveError> {
        validate_intent(&intent)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let outcome = match state.position(&intent.id) {
            None => Registration::Inserted,
            Some(pos) => {
                let current = &state.entries[pos];
                if current.intent == intent {
                    return Ok(Registration::Unchanged);
                }
                if current.intent.same_embedding_source(&intent) {
                    Registration::Updated
                } else {
                    Registration::Reembedding
                }
            }
        };

        let mut next = (**state).clone();
        match outcome {
            Registration::Inserted => {
                log::debug!("catalog: registered intent `{}`", intent.id);
                next.entries.push(Arc::new(IntentEntry::new(intent)));
                next.reindex();
            }
            Registration::Updated => {
                let pos = next.index[&intent.id];
                let slot = next.entries[pos].embedding.clone();
                next.entries[pos] = Arc::new(IntentEntry::with_slot(intent, slot));
            }
            Registration::Reembedding => {
                log::debug!("catalog: intent `{}` changed, re-embedding", intent.id);
                let pos = next.index[&intent.id];
                next.entries[pos] = Arc::new(IntentEntry::new(intent));
            }
            Registration::Unchanged => {}
        }

        *state = Arc::new(next);
        Ok(outcome)
    }

    /// Like `register`, but the intent must already exist.
    pub fn update(&self, intent: Intent) -> Result<Registration, ResolveError> {
        if self.snapshot().get(&intent.id).is_none() {
            return Err(ResolveError::UnknownIntent(intent.id));
        }
        self.register(intent)
    }

    pub fn remove(&self, id: &str) -> Result<Intent, ResolveError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let pos = state
            .position(id)
            .ok_or_else(|| ResolveError::UnknownIntent(id.to_string()))?;

        let mut next = (**state).clone();
        let removed = next.entries.remove(pos);
        next.reindex();
        *state = Arc::new(next);
        Ok(removed.intent.clone())
    }
}

fn validate_intent(intent: &Intent) -> Result<(), ResolveError> {
    if intent.id.trim().is_empty() {
        return Err(ResolveError::InvalidIntent("id must be non-empty".to_string()));
    }
    if intent.canonical_description.trim().is_empty() {
        return Err(ResolveError::InvalidIntent(format!(
            "`{}`: canonical_description must be non-empty",
            intent.id
        )));
    }
    if intent.target_action.trim().is_empty() {
        return Err(ResolveError::InvalidIntent(format!(
            "`{}`: target_action must be non-empty",
            intent.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SemanticMatcher;
    use crate::providers::lexical::LexicalEmbeddingProvider;
    use std::time::Duration;

    async fn embed_all(catalog: &IntentCatalog) {
        let matcher = SemanticMatcher::new(
            Arc::new(LexicalEmbeddingProvider::default()),
            Duration::from_secs(1),
        );
        matcher.ensure_embeddings(&catalog.snapshot()).await.unwrap();
    }

    fn order_lookup() -> Intent {
        Intent::new(
            "order_lookup",
            "check status of a customer order",
            "order.lookup",
        )
        .with_examples(["where is my order"])
    }

    #[test]
    fn test_register_preserves_order() {
        let catalog = IntentCatalog::new();
        catalog.register(order_lookup()).unwrap();
        catalog
            .register(Intent::new("reset_password", "reset a password", "user.reset_password"))
            .unwrap();

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.position("order_lookup"), Some(0));
        assert_eq!(snapshot.position("reset_password"), Some(1));
    }

    #[tokio::test]
    async fn test_identical_reregistration_keeps_embedding_and_position() {
        let catalog = IntentCatalog::new();
        catalog.register(order_lookup()).unwrap();
        catalog
            .register(Intent::new("greet", "say hello", "greet"))
            .unwrap();
        embed_all(&catalog).await;

        let before = catalog.snapshot();
        let outcome = catalog.register(order_lookup()).unwrap();
        let after = catalog.snapshot();

        assert_eq!(outcome, Registration::Unchanged);
        assert_eq!(after.position("order_lookup"), Some(0));
        assert_eq!(
            before.get("order_lookup").unwrap().embedding(),
            after.get("order_lookup").unwrap().embedding()
        );
    }

    #[tokio::test]
    async fn test_changed_text_triggers_reembedding_in_place() {
        let catalog = IntentCatalog::new();
        catalog.register(order_lookup()).unwrap();
        catalog
            .register(Intent::new("greet", "say hello", "greet"))
            .unwrap();
        embed_all(&catalog).await;

        let changed = order_lookup().with_examples(["track my parcel"]);
        assert_eq!(catalog.register(changed).unwrap(), Registration::Reembedding);

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.position("order_lookup"), Some(0));
        assert!(snapshot.get("order_lookup").unwrap().embedding().is_none());
        assert!(snapshot.get("greet").unwrap().embedding().is_some());
        assert_eq!(snapshot.missing_embeddings(), 1);
    }

    #[test]
    fn test_action_change_keeps_slot() {
        let catalog = IntentCatalog::new();
        catalog.register(order_lookup()).unwrap();
        let before = catalog.snapshot();

        let mut moved = order_lookup();
        moved.target_action = "orders.status".to_string();
        assert_eq!(catalog.register(moved).unwrap(), Registration::Updated);

        let after = catalog.snapshot();
        assert!(before
            .get("order_lookup")
            .unwrap()
            .shares_slot_with(after.get("order_lookup").unwrap()));
        assert_eq!(
            after.get("order_lookup").unwrap().intent().target_action,
            "orders.status"
        );
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let catalog = IntentCatalog::new();
        catalog.register(order_lookup()).unwrap();
        let snapshot = catalog.snapshot();

        catalog
            .register(Intent::new("greet", "say hello", "greet"))
            .unwrap();
        catalog.remove("order_lookup").unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("order_lookup").is_some());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.snapshot().position("greet"), Some(0));
    }

    #[test]
    fn test_update_requires_existing_intent() {
        let catalog = IntentCatalog::new();
        let err = catalog.update(order_lookup()).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownIntent(_)));
    }

    #[test]
    fn test_register_rejects_blank_description() {
        let catalog = IntentCatalog::new();
        let err = catalog
            .register(Intent::new("blank", "  ", "noop"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidIntent(_)));
    }

    #[test]
    fn test_find_literal_matches_id_then_action() {
        let catalog = IntentCatalog::new();
        catalog
            .register(Intent::new("check_order_status", "check order status", "order.lookup"))
            .unwrap();
        let snapshot = catalog.snapshot();

        assert_eq!(
            snapshot.find_literal("Check Order Status").unwrap().intent().id,
            "check_order_status"
        );
        assert_eq!(
            snapshot.find_literal("ORDER.LOOKUP").unwrap().intent().id,
            "check_order_status"
        );
        assert!(snapshot.find_literal("order").is_none());
        assert!(snapshot.has_category("Order"));
    }
}
