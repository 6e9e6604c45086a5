//! Telegram surface: dispatcher wiring, update handlers and the transport
//! implementation the orchestration core talks through.

pub mod adapter;
pub mod handler;
pub mod keyboard;
pub mod transport;

pub use adapter::TelegramAdapter;
pub use transport::TelegramTransport;

pub use teloxide::Bot;
