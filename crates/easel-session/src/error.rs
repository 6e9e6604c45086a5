use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by batch processing.
///
/// `Generation` is the expected failure class: the generation collaborator
/// reported a problem with the request or its response. Everything else is
/// an infrastructure fault.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] easel_store::StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Generation failed: {0}")]
    Generation(#[from] easel_api::ApiError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
