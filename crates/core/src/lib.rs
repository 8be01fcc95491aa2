//! Core library: retrieval, evidence gating, generation, orchestration, follow-ups.

pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod followup;
pub mod gate;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod retriever;
pub mod rules;
pub mod screening;
pub mod search;
pub mod session;

pub use classifier::{ClassifyRequest, Classifier};
pub use error::{ClassifyError, RequestError};
pub use models::ClassificationResult;
pub use pipeline::{ChatReply, TariffService};
