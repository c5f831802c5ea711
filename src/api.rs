use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Multipart, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::llm::ModelRouter;
use crate::models::{
    AskRequest, AskResponse, CreateFromFilesRequest, ExtractRequest, ExtractResponse,
    GuidelinesResponse, ReferenceFile, StatusResponse, SummarizeRequest, SummaryResponse,
    TextRequest, UploadResponse,
};
use crate::rag::embeddings::Embedder;
use crate::rag::KnowledgeBase;
use crate::services::chat::NO_KNOWLEDGE_BASE_MESSAGE;
use crate::services::{
    reference_file_name, AskOutcome, ChatService, ExtractionError, GuidelinesGenerator,
    PageExtractor, Summarizer,
};

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub models: Arc<ModelRouter>,
    pub knowledge_base: Arc<KnowledgeBase>,
    pub extractor: PageExtractor,
    pub summarizer: Summarizer,
    pub chat: ChatService,
    pub guidelines: GuidelinesGenerator,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        models: Arc<ModelRouter>,
        embedder: Arc<dyn Embedder>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let knowledge_base = Arc::new(KnowledgeBase::new(&config, embedder)?);
        Ok(Self {
            extractor: PageExtractor::new(client),
            summarizer: Summarizer::new(models.clone(), config.models.generation.clone()),
            chat: ChatService::new(&config, knowledge_base.clone(), models.clone()),
            guidelines: GuidelinesGenerator::new(&config, knowledge_base.clone(), models.clone()),
            knowledge_base,
            models,
            config,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/extraction/extract", post(extract_handler))
        .route("/api/summarization/summarize", post(summarize_handler))
        .route("/api/embeddings/create", post(create_embeddings_handler))
        .route(
            "/api/embeddings/create_from_files",
            post(create_from_files_handler),
        )
        .route("/api/embeddings/delete", post(delete_embeddings_handler))
        .route("/api/chat/ask", post(ask_handler))
        .route("/api/guidelines/generate", post(generate_guidelines_handler))
        .route(
            "/api/guidelines/references",
            get(list_references_handler).post(upload_references_handler),
        )
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn extract_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let text = state
        .extractor
        .extract(&request.url)
        .await
        .map_err(|e| match e {
            ExtractionError::InvalidUrl { .. } => ApiError::bad_request(e.to_string()),
            ExtractionError::Failed(err) => ApiError::failed("extracting website")(err),
        })?;

    Ok(Json(ExtractResponse {
        status: "success".to_string(),
        text,
    }))
}

async fn summarize_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SummarizeRequest>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let summary = state
        .summarizer
        .summarize(&request.text, request.model_type)
        .await
        .map_err(ApiError::failed("summarizing text"))?;

    Ok(Json(SummaryResponse {
        status: "success".to_string(),
        summary,
    }))
}

async fn create_embeddings_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TextRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .knowledge_base
        .build_from_text(&request.text)
        .await
        .map_err(ApiError::failed("creating embeddings"))?;

    Ok(Json(StatusResponse::success("Embeddings created successfully")))
}

async fn create_from_files_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateFromFilesRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    if request.file_paths.is_empty() {
        return Err(ApiError::bad_request("file_paths must not be empty"));
    }

    let report = state
        .knowledge_base
        .build_from_files(&request.file_paths)
        .await
        .map_err(ApiError::failed("creating embeddings"))?;

    let mut message = format!(
        "Embeddings created successfully from {} file(s)",
        report.documents
    );
    if !report.failed_sources.is_empty() {
        message.push_str(&format!(
            "; skipped {}: {}",
            report.failed_sources.len(),
            report.failed_sources.join(", ")
        ));
    }
    Ok(Json(StatusResponse::success(message)))
}

async fn delete_embeddings_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let outcome = state.knowledge_base.delete().await;
    if let Some(failure) = outcome.failure {
        tracing::warn!("Reporting index deletion as successful despite: {}", failure);
    }
    Json(StatusResponse::success("Embeddings deleted successfully"))
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let outcome = state
        .chat
        .ask(
            &request.question,
            request.model_type,
            request.chat_history.unwrap_or_default(),
        )
        .await
        .map_err(ApiError::failed("asking question"))?;

    Ok(Json(match outcome {
        AskOutcome::Answered {
            answer, history, ..
        } => AskResponse::Answer {
            answer,
            chat_history: history,
        },
        AskOutcome::NoKnowledgeBase => AskResponse::Error {
            error: NO_KNOWLEDGE_BASE_MESSAGE.to_string(),
        },
    }))
}

async fn generate_guidelines_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GuidelinesResponse>, ApiError> {
    let generated = state
        .guidelines
        .generate()
        .await
        .map_err(ApiError::failed("generating guidelines"))?;

    Ok(Json(GuidelinesResponse {
        status: "success".to_string(),
        guidelines: generated.content,
        file_path: generated.file_path.display().to_string(),
    }))
}

async fn list_references_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReferenceFile>>, ApiError> {
    let files = state
        .guidelines
        .list_references()
        .map_err(ApiError::failed("listing reference files"))?;
    Ok(Json(files))
}

async fn upload_references_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut accepted = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let name = reference_file_name(&file_name)
            .map_err(|e| ApiError::bad_request(e.to_string()))?
            .to_string();

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read {}: {}", file_name, e)))?;
        accepted.push((name, data));
    }

    if accepted.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let mut uploaded_files = Vec::with_capacity(accepted.len());
    for (name, data) in accepted {
        state
            .guidelines
            .save_reference(&name, &data)
            .map_err(ApiError::failed("uploading reference files"))?;
        uploaded_files.push(name);
    }

    let total_files_in_dir = state
        .guidelines
        .list_references()
        .map_err(ApiError::failed("listing reference files"))?
        .len();

    Ok(Json(UploadResponse {
        uploaded_files,
        total_files_in_dir,
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ollama_healthy = state.models.local().health_check().await.unwrap_or(false);

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "index_present": state.knowledge_base.is_present().await,
        "index_dir": state.config.storage.index_dir.display().to_string(),
        "services": {
            "ollama": ollama_healthy,
            "ollama_model": state.config.models.ollama.model
        }
    }))
}
