use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{ActionId, AgentId, NegotiationStatus};
use crate::error::ResolveError;

/// An agent's declared ability to perform one action. Keyed by `(agent_id, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub agent_id: AgentId,
    pub action: ActionId,
    #[serde(default)]
    pub required_parameters: BTreeSet<String>,
    #[serde(default)]
    pub optional_parameters: BTreeSet<String>,
    /// Higher wins.
    #[serde(default)]
    pub priority: i32,
}

impl Capability {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            required_parameters: BTreeSet::new(),
            optional_parameters: BTreeSet::new(),
            priority: 0,
        }
    }

    pub fn with_required<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_parameters = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_optional<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_parameters = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.agent_id, &self.action)
    }

    pub fn declares(&self, parameter: &str) -> bool {
        self.required_parameters.contains(parameter) || self.optional_parameters.contains(parameter)
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.agent_id.trim().is_empty() || self.action.trim().is_empty() {
            return Err(ResolveError::InvalidCapability(
                "agent_id and action must be non-empty".to_string(),
            ));
        }

        let overlap: Vec<&str> = self
            .required_parameters
            .intersection(&self.optional_parameters)
            .map(String::as_str)
            .collect();
        if !overlap.is_empty() {
            return Err(ResolveError::InvalidCapability(format!(
                "{}/{}: parameters both required and optional: {}",
                self.agent_id,
                self.action,
                overlap.join(", ")
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub agent_id: AgentId,
    pub action: ActionId,
    pub match_score: f32,
    pub missing_parameters: BTreeSet<String>,
    pub extra_parameters: BTreeSet<String>,
    pub status: NegotiationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_overlapping_parameters() {
        let cap = Capability::new("hris_agent", "setup_employee")
            .with_required(["employee_name", "start_date"])
            .with_optional(["start_date", "manager"]);

        let err = cap.validate().unwrap_err();
        assert!(matches!(err, ResolveError::InvalidCapability(_)));
        assert!(err.to_string().contains("start_date"));
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let cap = Capability::new("", "setup_employee");
        assert!(cap.validate().is_err());
    }

    #[test]
    fn test_declares_covers_both_sets() {
        let cap = Capability::new("it_agent", "create_accounts")
            .with_required(["employee_name"])
            .with_optional(["email"]);
        assert!(cap.declares("employee_name"));
        assert!(cap.declares("email"));
        assert!(!cap.declares("salary"));
        assert!(cap.validate().is_ok());
    }
}
