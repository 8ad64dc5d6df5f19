/// Ripple - headless chat client core
///
/// Client-side chat logic over a managed realtime document backend:
/// optimistic message sending, mention autocomplete, text annotation and
/// search, typing presence, and session state. Durability, ordering, and
/// fan-out guarantees are the backend collaborator's concern.

pub mod error;
pub mod config;
pub mod types;
pub mod backend;
pub mod memory;
pub mod scanner;
pub mod mention;
pub mod composer;
pub mod outbox;
pub mod typing;
pub mod session;

pub use error::{ChatError, Result};
pub use config::Config;
pub use backend::ChatBackend;
pub use session::ChatSession;
