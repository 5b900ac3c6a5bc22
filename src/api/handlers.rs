use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::engine::ResolutionEngine;
use crate::storage::Registration;
use crate::types::{
    Capability, Intent, NegotiationOutcome, Parameters, RequestEnvelope, ResolutionResult,
    ResolutionStatus,
};

/// A resolution plus the markers the transport adds for its caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub message_id: Uuid,
    #[serde(flatten)]
    pub result: ResolutionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default)]
    pub escalate: bool,
}

impl ResolveResponse {
    fn new(message_id: Uuid, result: ResolutionResult) -> Self {
        let warning = (result.status == ResolutionStatus::Partial).then(|| {
            if result.missing_parameters.is_empty() {
                "only part of the request was resolved".to_string()
            } else {
                format!(
                    "missing parameters: {}",
                    result
                        .missing_parameters
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        });
        let escalate = result.status == ResolutionStatus::Unmatched;
        Self {
            message_id,
            result,
            warning,
            escalate,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NegotiateRequest {
    pub action: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Deserialize)]
pub struct CapabilityQuery {
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntentRegistered {
    pub id: String,
    pub registration: Registration,
}

pub async fn health_check(State(engine): State<Arc<ResolutionEngine>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "embedding_provider": engine.provider_name(),
        "intents": engine.catalog().len(),
        "capabilities": engine.registry().len(),
    }))
}

pub async fn get_config(State(engine): State<Arc<ResolutionEngine>>) -> Json<serde_json::Value> {
    let config = engine.config();
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "similarity_threshold": config.similarity_threshold,
        "considerable_threshold": config.considerable_threshold,
        "approximation_threshold": config.effective_approximation_threshold(),
        "decomposition_enabled": config.decomposition_enabled,
        "decomposition_threshold": config.decomposition_threshold,
        "top_k": config.top_k,
        "embedding_timeout_ms": config.embedding_timeout_ms,
        "embedding_provider": engine.provider_name(),
    }))
}

pub async fn resolve(
    State(engine): State<Arc<ResolutionEngine>>,
    Json(envelope): Json<RequestEnvelope>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let result = engine.resolve_envelope(&envelope).await?;
    Ok(Json(ResolveResponse::new(envelope.message_id, result)))
}

pub async fn negotiate(
    State(engine): State<Arc<ResolutionEngine>>,
    Json(request): Json<NegotiateRequest>,
) -> Result<Json<NegotiationOutcome>, ApiError> {
    if request.action.trim().is_empty() {
        return Err(ApiError::BadRequest("action must be non-empty".to_string()));
    }
    engine
        .negotiate(&request.action, &request.parameters)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no agent advertises `{}`", request.action)))
}

pub async fn list_intents(State(engine): State<Arc<ResolutionEngine>>) -> Json<Vec<Intent>> {
    Json(engine.catalog().snapshot().intents())
}

pub async fn register_intent(
    State(engine): State<Arc<ResolutionEngine>>,
    Json(intent): Json<Intent>,
) -> Result<Json<IntentRegistered>, ApiError> {
    let id = intent.id.clone();
    let registration = engine.catalog().register(intent)?;
    Ok(Json(IntentRegistered { id, registration }))
}

pub async fn list_capabilities(
    State(engine): State<Arc<ResolutionEngine>>,
    Query(query): Query<CapabilityQuery>,
) -> Json<Vec<Capability>> {
    let capabilities = match query.action {
        Some(action) => engine.registry().lookup(&action),
        None => engine.registry().snapshot().capabilities(),
    };
    Json(capabilities)
}

pub async fn register_capability(
    State(engine): State<Arc<ResolutionEngine>>,
    Json(capability): Json<Capability>,
) -> Result<Json<Capability>, ApiError> {
    engine.registry().register(capability.clone())?;
    Ok(Json(capability))
}

pub async fn update_capability(
    State(engine): State<Arc<ResolutionEngine>>,
    Json(capability): Json<Capability>,
) -> Result<Json<Capability>, ApiError> {
    engine.registry().update(capability.clone())?;
    Ok(Json(capability))
}

pub async fn deregister_capability(
    State(engine): State<Arc<ResolutionEngine>>,
    Path((agent_id, action)): Path<(String, String)>,
) -> Result<Json<Capability>, ApiError> {
    let removed = engine.registry().deregister(&agent_id, &action)?;
    Ok(Json(removed))
}
