use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::task;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use policyqa_rag::{
    build_embedder, build_llm, process_documents, Answer, Embedder, PipelineConfig,
    PipelineError, QueryHit, QueryOutcome, QueryPipeline,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

#[derive(Clone)]
struct AppState {
    config: Arc<PipelineConfig>,
    embedder: Arc<dyn Embedder>,
    pipeline: QueryPipeline,
}

impl AppState {
    fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let config = Arc::new(config);
        let embedder: Arc<dyn Embedder> = Arc::new(build_embedder(&config)?);
        let llm = build_llm(&config.llm)?;
        let pipeline = QueryPipeline::new(config.clone(), embedder.clone(), llm);
        Ok(Self {
            config,
            embedder,
            pipeline,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = PipelineConfig::load(None)?;
    // the embedding client uses blocking http and must be built off the runtime
    let state = task::spawn_blocking(move || AppState::from_config(config)).await??;
    info!(
        collection = %state.config.collection_name,
        store = %state.config.vector_db_dir.display(),
        "pipeline ready"
    );

    let app = build_router(Arc::new(state));
    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/process-documents", post(handle_process_documents))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    status: &'static str,
    message: &'static str,
    retrieved: Vec<QueryHit>,
    answer: Option<Answer>,
}

async fn handle_health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "healthy",
        message: "Insurance Document Query Assistant is running".to_string(),
    })
}

async fn handle_process_documents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (parsed, indexed) = task::spawn_blocking(move || {
        process_documents(&state.config, state.embedder.as_ref())
    })
    .await
    .map_err(AppError::internal)??;
    Ok(Json(json!({
        "status": "success",
        "message": "Documents processed and embedded successfully",
        "parse": parsed,
        "index": indexed,
    })))
}

async fn handle_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let query = body
        .ok()
        .and_then(|Json(req)| req.query)
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::bad_request("Query parameter is required"))?;
    let pipeline = state.pipeline.clone();
    let outcome = task::spawn_blocking(move || pipeline.run(&query))
        .await
        .map_err(AppError::internal)??;
    let response = match outcome {
        QueryOutcome::NoRelevantDocuments => QueryResponse {
            status: "success",
            message: "No relevant documents found",
            retrieved: Vec::new(),
            answer: None,
        },
        QueryOutcome::Answered { retrieved, answer } => QueryResponse {
            status: "success",
            message: "Query processed successfully",
            retrieved,
            answer: Some(answer),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Pipeline(err) => {
                error!(kind = ?err.kind(), "pipeline_error" = %format!("{err:#}"));
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AppError::Internal(err) => {
                error!("internal_error" = %format!("{err:#}"));
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        let body = StatusResponse {
            status: "error",
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use policyqa_rag::{LlmBackend, SamplingConfig};
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }

        fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("knee") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct FixedLlm;

    impl LlmBackend for FixedLlm {
        fn generate(&self, _s: &str, _u: &str, _p: &SamplingConfig) -> Result<String> {
            Ok(r#"{"final_answer":"Approved","confidence":"Medium","reasoning":"Knee surgery is listed."}"#.to_string())
        }

        fn provider_label(&self) -> &str {
            "Fixed"
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let mut config = PipelineConfig {
            docs_dir: dir.path().join("docs"),
            chunk_file: dir.path().join("chunks/chunked_docs.json"),
            vector_db_dir: dir.path().join("embeddings/store"),
            ..PipelineConfig::default()
        };
        config.parser.extensions = vec!["pdf".to_string(), "txt".to_string()];
        let config = Arc::new(config);
        let embedder: Arc<dyn Embedder> = Arc::new(AxisEmbedder);
        let pipeline = QueryPipeline::new(config.clone(), embedder.clone(), Arc::new(FixedLlm));
        Arc::new(AppState {
            config,
            embedder,
            pipeline,
        })
    }

    async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let dir = tempdir().unwrap();
        let (status, body) = send(build_router(test_state(&dir)), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn query_without_text_is_a_bad_request() {
        let dir = tempdir().unwrap();
        for payload in ["{}", r#"{"query": "   "}"#, "not json"] {
            let (status, body) =
                send(build_router(test_state(&dir)), "POST", "/query", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["status"], "error");
            assert_eq!(body["message"], "Query parameter is required");
        }
    }

    #[tokio::test]
    async fn query_before_processing_is_a_server_error() {
        let dir = tempdir().unwrap();
        let (status, body) = send(
            build_router(test_state(&dir)),
            "POST",
            "/query",
            r#"{"query": "Is knee surgery covered?"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("No document collection"));
    }

    #[tokio::test]
    async fn processing_with_no_documents_is_a_server_error() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let (status, body) = send(
            build_router(test_state(&dir)),
            "POST",
            "/process-documents",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn processed_documents_answer_queries() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(
            docs.join("gold.txt"),
            "Knee replacement surgery is covered after 24 months.\n\nDental work is excluded from this plan entirely.",
        )
        .unwrap();
        let state = test_state(&dir);

        let (status, body) =
            send(build_router(state.clone()), "POST", "/process-documents", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["index"]["indexed"], 2);

        let (status, body) = send(
            build_router(state),
            "POST",
            "/query",
            r#"{"query": "Is knee surgery covered?"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["answer"]["final_answer"], "Approved");
        assert_eq!(body["answer"]["query"]["text"], "Is knee surgery covered?");
        assert_eq!(body["retrieved"][0]["metadata"]["doc_id"], "gold.txt");
        assert_eq!(body["retrieved"][0]["metadata"]["index"], 0);
    }
}
