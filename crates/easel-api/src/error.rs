use thiserror::Error;

/// Errors from the generation API and the model catalog.
///
/// Everything here is a collaborator-reported failure: the request reached
/// the API layer and came back unusable.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("response contains no inline image data")]
    NoImage,

    #[error("invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no image-capable models found")]
    EmptyCatalog,
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Cap a response body quoted in an error message. Counted in characters so
/// multi-byte payloads cannot split.
pub(crate) fn truncate_body(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
