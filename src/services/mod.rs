//! The pipeline stages behind the HTTP routes.

pub mod chat;
pub mod extraction;
pub mod guidelines;
pub mod summarization;

pub use chat::{AskOutcome, ChatService};
pub use extraction::{ExtractionError, PageExtractor};
pub use guidelines::{reference_file_name, GeneratedGuidelines, GuidelinesGenerator};
pub use summarization::Summarizer;
