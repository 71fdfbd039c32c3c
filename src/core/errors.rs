use thiserror::Error;

/// Failure taxonomy for the scraping pipeline.
///
/// The variants differ in blast radius, not just message:
/// * retryable: the per-item retry wrapper may try again;
/// * session-fatal: the owning batch must abort and the worker's profile
///   is flagged for reset;
/// * non-fatal: logged and forgotten.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Navigation timeout, empty extraction, flaky network. Retryable.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// An interactive verification gate was detected and could not be
    /// cleared. Session-fatal: the profile is burned.
    #[error("challenge unresolved")]
    ChallengeUnresolved,

    /// The browser context or page died mid-operation. Session-fatal.
    #[error("browser session died: {0}")]
    SessionCrashed(String),

    /// All launch attempts for a persistent worker context were exhausted.
    /// Fatal to the batch that needed the session.
    #[error("session launch failed after {attempts} attempts: {message}")]
    SessionLaunch { attempts: u32, message: String },

    /// Profile-directory cleanup failed. Logged only, never fatal.
    #[error("resource cleanup failed: {0}")]
    ResourceCleanup(String),
}

impl ScrapeError {
    /// True when the error burns the whole session: the remainder of the
    /// owning batch must be abandoned and the profile reset.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::ChallengeUnresolved
                | ScrapeError::SessionCrashed(_)
                | ScrapeError::SessionLaunch { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::TransientFetch(_))
    }

    /// Classify a raw CDP/browser error string. chromiumoxide surfaces page
    /// death as "closed"/"Target" messages rather than a dedicated type.
    pub fn from_browser_error(context: &str, message: impl std::fmt::Display) -> Self {
        let msg = message.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("closed") || lower.contains("target") || lower.contains("detached") {
            ScrapeError::SessionCrashed(format!("{}: {}", context, msg))
        } else {
            ScrapeError::TransientFetch(format!("{}: {}", context, msg))
        }
    }
}
