//! DocSage: a retrieval-augmented question answering service over ingested
//! documentation.

pub mod context;
pub mod core;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod state;
pub mod vector_math;

pub use crate::core::errors::{ApiError, RagError};
pub use pipeline::{Answer, IngestReport, RagPipeline};
