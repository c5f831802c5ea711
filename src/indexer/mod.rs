//! Turning files and raw text into chunks.

pub mod chunker;
pub mod loader;
pub mod walker;

pub use chunker::{DocumentChunk, RecursiveSplitter};
pub use loader::{load_document, Document, DocumentFormat};
