use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::engine::ResolutionEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ResolutionEngine>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/config", get(handlers::get_config))
        .route("/resolve", post(handlers::resolve))
        .route("/negotiate", post(handlers::negotiate))
        .route(
            "/intents",
            get(handlers::list_intents).post(handlers::register_intent),
        )
        .route(
            "/capabilities",
            get(handlers::list_capabilities)
                .post(handlers::register_capability)
                .put(handlers::update_capability),
        )
        .route(
            "/capabilities/:agent_id/:action",
            delete(handlers::deregister_capability),
        )
        .layer(CorsLayer::permissive())
        .with_state(state.engine)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("pact API server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::EngineConfig;
    use crate::providers::LexicalEmbeddingProvider;
    use crate::storage::{CapabilityRegistry, IntentCatalog};
    use crate::types::{Capability, Intent};

    fn create_test_app(intents: Vec<Intent>, capabilities: Vec<Capability>) -> Router {
        let engine = ResolutionEngine::new(
            EngineConfig::default(),
            Arc::new(IntentCatalog::with_intents(intents).unwrap()),
            Arc::new(CapabilityRegistry::with_capabilities(capabilities).unwrap()),
            Arc::new(LexicalEmbeddingProvider::default()),
        )
        .unwrap();
        create_router(AppState {
            engine: Arc::new(engine),
        })
    }

    fn empty_app() -> Router {
        create_test_app(Vec::new(), Vec::new())
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, json) = send(empty_app(), "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["embedding_provider"], "lexical");
        assert_eq!(json["intents"], 0);
    }

    #[tokio::test]
    async fn test_get_config() {
        let (status, json) = send(empty_app(), "GET", "/config", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["version"].is_string());
        assert!((json["similarity_threshold"].as_f64().unwrap() - 0.75).abs() < 1e-6);
        assert_eq!(json["top_k"], 5);
    }

    #[tokio::test]
    async fn test_resolve_unmatched_escalates() {
        let (status, json) = send(
            empty_app(),
            "POST",
            "/resolve",
            Some(json!({
                "sender_platform": "slack",
                "recipient_platform": "teams",
                "text": "what's the weather like"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "unmatched");
        assert_eq!(json["strategy_applied"], "graceful_failure");
        assert_eq!(json["escalate"], true);
        assert!(json["message_id"].is_string());
    }

    #[tokio::test]
    async fn test_resolve_partial_carries_warning() {
        let app = create_test_app(
            Vec::new(),
            vec![Capability::new("shop_agent", "order.lookup").with_required(["order_id", "email"])],
        );
        let (status, json) = send(
            app,
            "POST",
            "/resolve",
            Some(json!({
                "sender_platform": "slack",
                "recipient_platform": "shopify",
                "action": "order.lookup",
                "parameters": {"order_id": "A1"}
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "partial");
        assert_eq!(json["agent_id"], "shop_agent");
        assert_eq!(json["missing_parameters"], json!(["email"]));
        assert_eq!(json["warning"], "missing parameters: email");
        assert_eq!(json["escalate"], false);
    }

    #[tokio::test]
    async fn test_resolve_blank_envelope_is_bad_request() {
        let (status, json) = send(
            empty_app(),
            "POST",
            "/resolve",
            Some(json!({
                "sender_platform": "slack",
                "recipient_platform": "teams",
                "text": "   "
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_negotiate_unknown_action_not_found() {
        let (status, _) = send(
            empty_app(),
            "POST",
            "/negotiate",
            Some(json!({"action": "order.lookup"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_capability_lifecycle() {
        let app = empty_app();

        let (status, _) = send(
            app.clone(),
            "POST",
            "/capabilities",
            Some(json!({
                "agent_id": "hris_agent",
                "action": "setup_employee",
                "required_parameters": ["employee_name", "start_date"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send(
            app.clone(),
            "POST",
            "/negotiate",
            Some(json!({
                "action": "setup_employee",
                "parameters": {"employee_name": "Ada"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "partial");
        assert_eq!(json["missing_parameters"], json!(["start_date"]));

        let (status, json) = send(app.clone(), "GET", "/capabilities?action=setup_employee", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);

        let (status, _) = send(
            app.clone(),
            "DELETE",
            "/capabilities/hris_agent/setup_employee",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            app,
            "DELETE",
            "/capabilities/hris_agent/setup_employee",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_unknown_capability_not_found() {
        let (status, _) = send(
            empty_app(),
            "PUT",
            "/capabilities",
            Some(json!({"agent_id": "a", "action": "b"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_capability_rejected() {
        let (status, json) = send(
            empty_app(),
            "POST",
            "/capabilities",
            Some(json!({
                "agent_id": "a",
                "action": "b",
                "required_parameters": ["x"],
                "optional_parameters": ["x"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_register_and_list_intents() {
        let app = empty_app();
        let intent = json!({
            "id": "order_lookup",
            "canonical_description": "look up an order",
            "target_action": "order.lookup"
        });

        let (status, json) = send(app.clone(), "POST", "/intents", Some(intent.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["registration"], "inserted");

        let (_, json) = send(app.clone(), "POST", "/intents", Some(intent)).await;
        assert_eq!(json["registration"], "unchanged");

        let (_, json) = send(app, "GET", "/intents", None).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["id"], "order_lookup");
    }
}
