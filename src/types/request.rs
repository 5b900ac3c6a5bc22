use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Parameters;
use crate::error::ResolveError;

/// What the engine needs from an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    #[serde(default)]
    pub utterance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    /// Preferred intent category, used to anchor approximation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<String>,
    /// Values copied verbatim into `bound_parameters` (platform identifiers).
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub passthrough: Parameters,
}

impl ResolutionRequest {
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_category_hint(mut self, category: impl Into<String>) -> Self {
        self.category_hint = Some(category.into());
        self
    }

    pub fn text(&self) -> Option<&str> {
        let trimmed = self.utterance.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn action_token(&self) -> Option<&str> {
        self.action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.text().is_none() && self.action_token().is_none() {
            return Err(ResolveError::MalformedRequest(
                "request carries neither an utterance nor an action".to_string(),
            ));
        }
        Ok(())
    }
}

/// Inbound message as handed over by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub sender_platform: String,
    pub recipient_platform: String,
    #[serde(default, alias = "action_or_text")]
    pub text: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl RequestEnvelope {
    pub fn new(
        sender_platform: impl Into<String>,
        recipient_platform: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sender_platform: sender_platform.into(),
            recipient_platform: recipient_platform.into(),
            text: Some(text.into()),
            action: None,
            parameters: Parameters::new(),
            context: serde_json::Map::new(),
        }
    }

    pub fn to_request(&self) -> ResolutionRequest {
        let category_hint = ["category", "domain"]
            .iter()
            .find_map(|key| self.context.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string);

        let mut passthrough = Parameters::new();
        passthrough.insert(
            "sender_platform".to_string(),
            serde_json::Value::String(self.sender_platform.clone()),
        );
        passthrough.insert(
            "recipient_platform".to_string(),
            serde_json::Value::String(self.recipient_platform.clone()),
        );

        ResolutionRequest {
            utterance: self.text.clone().unwrap_or_default(),
            action: self.action.clone(),
            parameters: self.parameters.clone(),
            category_hint,
            passthrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_rejects_blank_request() {
        let request = ResolutionRequest::new("   ").with_action(" ");
        assert!(matches!(
            request.validate(),
            Err(ResolveError::MalformedRequest(_))
        ));

        assert!(ResolutionRequest::new("").with_action("order.lookup").validate().is_ok());
        assert!(ResolutionRequest::new("where is my order").validate().is_ok());
    }

    #[test]
    fn test_envelope_accepts_action_or_text_field() {
        let envelope: RequestEnvelope = serde_json::from_value(json!({
            "sender_platform": "slack",
            "recipient_platform": "zendesk",
            "action_or_text": "Where is my order?",
            "parameters": {"order_id": "A-17"},
            "context": {"domain": "order"}
        }))
        .unwrap();

        let request = envelope.to_request();
        assert_eq!(request.utterance, "Where is my order?");
        assert_eq!(request.parameters["order_id"], json!("A-17"));
        assert_eq!(request.category_hint.as_deref(), Some("order"));
        assert_eq!(request.passthrough["sender_platform"], json!("slack"));
        assert_eq!(request.passthrough["recipient_platform"], json!("zendesk"));
    }
}
