//! Errors raised while setting up the HTTP adapter.

use thiserror::Error;

/// The HTTP client could not be constructed.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The TLS backend or another client component failed to initialise.
    #[error("Failed to build HTTP client (ssl_insecure = {ssl_insecure}): {message}")]
    ClientBuild {
        /// Which of the two clients failed.
        ssl_insecure: bool,
        /// Underlying error.
        message: String,
    },
}
