pub mod catalog;
pub mod client;
pub mod error;

pub use catalog::{load_catalog, ModelCatalog, ModelInfo};
pub use client::{GeminiImageClient, ImageGenerator};
pub use error::ApiError;
