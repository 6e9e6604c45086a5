pub mod config;
pub mod error;
pub mod types;

pub use config::{CatalogFallback, EaselConfig};
pub use error::{EaselError, Result};
pub use types::{MessageRef, MessageSnapshot, PhotoRef, UserId};
