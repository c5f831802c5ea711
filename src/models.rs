use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which family of chat model serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelType {
    /// Hosted Azure OpenAI deployment.
    #[default]
    #[serde(rename = "Closed Source", alias = "closed_source")]
    ClosedSource,
    /// Locally hosted Ollama model.
    #[serde(rename = "Open Source", alias = "open_source")]
    OpenSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub bot: String,
}

// Request bodies

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,
    #[serde(default)]
    pub model_type: ModelType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFromFilesRequest {
    pub file_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub chat_history: Option<Vec<ChatTurn>>,
}

// Responses

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub status: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub status: String,
    pub summary: String,
}

/// Either an answer with the updated history, or the missing-knowledge-base notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AskResponse {
    Answer {
        answer: String,
        chat_history: Vec<ChatTurn>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidelinesResponse {
    pub status: String,
    pub guidelines: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub uploaded_files: Vec<String>,
    pub total_files_in_dir: usize,
}
