pub mod api;
pub mod config;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod rag;
pub mod services;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;
