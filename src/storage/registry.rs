use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ResolveError;
use crate::types::{normalize_token, Capability};

type CapabilityKey = (String, String);

/// Immutable view of the registry.
#[derive(Debug, Default, Clone)]
pub struct RegistrySnapshot {
    /// Registration sequence -> capability.
    entries: BTreeMap<u64, Capability>,
    keys: HashMap<CapabilityKey, u64>,
    next_seq: u64,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, agent_id: &str, action: &str) -> Option<&Capability> {
        self.keys
            .get(&(agent_id.to_string(), action.to_string()))
            .and_then(|seq| self.entries.get(seq))
    }

    /// All capabilities advertising `action`, by priority (highest first)
    /// then registration order.
    pub fn lookup(&self, action: &str) -> Vec<&Capability> {
        let mut found: Vec<(u64, &Capability)> = self
            .entries
            .iter()
            .filter(|(_, c)| c.action == action)
            .map(|(seq, c)| (*seq, c))
            .collect();
        found.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority.cmp(&a.priority).then(seq_a.cmp(seq_b))
        });
        found.into_iter().map(|(_, c)| c).collect()
    }

    /// The advertised action equal to `token` under `normalize_token`, if any.
    pub fn find_action(&self, token: &str) -> Option<&str> {
        let wanted = normalize_token(token);
        if wanted.is_empty() {
            return None;
        }
        self.entries
            .values()
            .find(|c| normalize_token(&c.action) == wanted)
            .map(|c| c.action.as_str())
    }

    pub fn actions(&self) -> BTreeSet<String> {
        self.entries.values().map(|c| c.action.clone()).collect()
    }

    /// Every capability, in registration order.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.entries.values().cloned().collect()
    }
}

/// Shared capability registry with single-writer, snapshot-read discipline.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    state: RwLock<Arc<RegistrySnapshot>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Result<Self, ResolveError> {
        let registry = Self::new();
        for capability in capabilities {
            registry.register(capability)?;
        }
        Ok(registry)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
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

    pub fn lookup(&self, action: &str) -> Vec<Capability> {
        self.snapshot().lookup(action).into_iter().cloned().collect()
    }

    /// Adds a capability. Re-registering an existing `(agent_id, action)` replaces
    /// it in place, keeping its registration order.
    pub fn register(&self, capability: Capability) -> Result<(), ResolveError> {
        capability.validate()?;
        self.write(|next| {
            let key = (capability.agent_id.clone(), capability.action.clone());
            let seq = match next.keys.get(&key) {
                Some(seq) => *seq,
                None => {
                    let seq = next.next_seq;
                    next.next_seq += 1;
                    next.keys.insert(key, seq);
                    seq
                }
            };
            log::debug!(
                "registry: {} advertises `{}` (priority {})",
                capability.agent_id,
                capability.action,
                capability.priority
            );
            next.entries.insert(seq, capability);
            Ok(())
        })
    }

    /// Replaces the entry keyed by `(agent_id, action)`, which must exist.
    pub fn update(&self, capability: Capability) -> Result<(), ResolveError> {
        capability.validate()?;
        self.write(|next| {
            let key = (capability.agent_id.clone(), capability.action.clone());
            let seq = *next.keys.get(&key).ok_or_else(|| ResolveError::UnknownCapability {
                agent_id: capability.agent_id.clone(),
                action: capability.action.clone(),
            })?;
            next.entries.insert(seq, capability);
            Ok(())
        })
    }

    pub fn deregister(&self, agent_id: &str, action: &str) -> Result<Capability, ResolveError> {
        self.write(|next| {
            let seq = next
                .keys
                .remove(&(agent_id.to_string(), action.to_string()))
                .ok_or_else(|| ResolveError::UnknownCapability {
                    agent_id: agent_id.to_string(),
                    action: action.to_string(),
                })?;
            next.entries
                .remove(&seq)
                .ok_or_else(|| ResolveError::UnknownCapability {
                    agent_id: agent_id.to_string(),
                    action: action.to_string(),
                })
        })
    }

    /// Applies `change` to a copy of the current state and publishes it only on success.
    fn write<T>(
        &self,
        change: impl FnOnce(&mut RegistrySnapshot) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**state).clone();
        let value = change(&mut next)?;
        *state = Arc::new(next);
        Ok(value)
    }
}
