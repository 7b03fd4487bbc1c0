//! HTTP API gateway for DocuAgent.
//!
//! Exposes the agent over REST:
//!
//! - `POST /v1/ask`        — ask a question, get the full answer as JSON
//! - `POST /v1/ask/stream` — ask a question, get trace events over SSE
//! - `GET  /health`        — liveness check
//!
//! Built on Axum for high performance async HTTP.

use axum::extract::DefaultBodyLimit;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use docuagent_agent::executor::{AgentExecutor, AgentOutcome};
use docuagent_core::Principal;
use docuagent_core::error::{Error, GeneratorError};
use docuagent_core::generator::Generator;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: docuagent_config::AppConfig,
    pub generator: Arc<dyn Generator>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/ask", post(ask_handler))
        .route("/v1/ask/stream", post(ask_stream_handler))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: docuagent_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let generator = docuagent_providers::from_config(&config.generator)?;
    let state = Arc::new(GatewayState { config, generator });
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn executor_for(state: &GatewayState, principal: &Principal) -> AgentExecutor {
    let tools = docuagent_tools::demo_suite(principal);
    AgentExecutor::new(state.generator.clone(), tools)
        .with_wall_clock(Duration::from_secs(state.config.agent.wall_clock_secs))
}

/// Resolve the caller identity from the `x-principal` header.
fn principal_from(headers: &axum::http::HeaderMap) -> Principal {
    headers
        .get("x-principal")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .map(Principal::new)
        .unwrap_or_else(|| Principal::new("anonymous"))
}

fn error_response(e: Error) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        Error::Generator(GeneratorError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    question: String,
    /// Include the execution trace in the response. Defaults to the
    /// gateway's configured `agent.return_trace`.
    #[serde(default)]
    return_trace: Option<bool>,
}

/// `POST /v1/ask` — run the agent to completion and return the answer.
async fn ask_handler(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AgentOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let principal = principal_from(&headers);
    info!(principal = %principal.as_str(), question_len = payload.question.len(), "v1/ask request");

    let executor = executor_for(&state, &principal);
    let mut outcome = executor
        .run(&principal, &payload.question)
        .await
        .map_err(|e| {
            error!(error = %e, "Agent run failed");
            error_response(e)
        })?;

    let return_trace = payload
        .return_trace
        .unwrap_or(state.config.agent.return_trace);
    if !return_trace {
        outcome.trace.clear();
    }

    Ok(Json(outcome))
}

/// `POST /v1/ask/stream` — run the agent, streaming trace events over SSE.
///
/// Events are named by their kind (`plan`, `tool_call`, `validation`,
/// `reprompt`, `final`, `error`); the stream always ends with a `done`
/// event carrying the complete outcome, unless the run failed before
/// producing one.
async fn ask_stream_handler(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let principal = principal_from(&headers);
    info!(principal = %principal.as_str(), question_len = payload.question.len(), "v1/ask/stream SSE request");

    let executor = executor_for(&state, &principal);
    let rx = executor.run_stream(principal, payload.question);

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type().to_string();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use docuagent_core::generator::GenerateRequest;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct CannedGenerator(String);

    #[async_trait]
    impl Generator for CannedGenerator {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<String, GeneratorError> {
            Ok(self.0.clone())
        }
    }

    fn test_state(response: &str) -> SharedState {
        Arc::new(GatewayState {
            config: docuagent_config::AppConfig::default(),
            generator: Arc::new(CannedGenerator(response.into())),
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state("{}"));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ask_rejects_empty_question() {
        let app = build_router(test_state("{}"));

        let req = Request::builder()
            .method("POST")
            .uri("/v1/ask")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"question": "   "}"#))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn ask_rejects_overlong_question() {
        let app = build_router(test_state("{}"));

        let question = "x".repeat(2000);
        let body = serde_json::json!({ "question": question }).to_string();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/ask")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ask_returns_answer_json() {
        // The canned generator always replies with an unusable plan and
        // malformed actions, so the run terminates through the no-sources
        // path with a well-formed outcome.
        let app = build_router(test_state("not json"));

        let req = Request::builder()
            .method("POST")
            .uri("/v1/ask")
            .header("content-type", "application/json")
            .header("x-principal", "user-1")
            .body(Body::from(
                r#"{"question": "What is the retry policy?", "returnTrace": false}"#,
            ))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["answer"].as_str().is_some());
        assert!(parsed.get("trace").is_none());
    }
}
