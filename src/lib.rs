pub mod core;
pub mod output;
pub mod scrape;
pub mod session;
pub mod stealth;

// --- Primary core exports ---
pub use self::core::config;
pub use self::core::errors::ScrapeError;
pub use self::core::types;
pub use self::core::types::*;

// --- Commonly-used module paths ---
pub use scrape::{retry, Orchestrator};
pub use session::{identity, warmer, SessionManager, WorkerSession};
pub use stealth::{challenge, humanize};
