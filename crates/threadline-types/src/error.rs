use thiserror::Error;

/// Errors surfaced by the transport boundary.
///
/// Flat on purpose: callers dispatch on the variant directly. Values are
/// `Clone` so one outcome can be handed to every waiter of a coalesced request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {cause}")]
    Network { cause: String },

    #[error("Authentication failed (status {status_code})")]
    Auth { status_code: u16 },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("API error ({status_code}): {message}")]
    Api { status_code: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn network(cause: impl std::fmt::Display) -> Self {
        Self::Network {
            cause: cause.to_string(),
        }
    }

    /// Map a non-success HTTP status to its taxonomy entry.
    pub fn from_status(status_code: u16, resource: &str, body: &str) -> Self {
        match status_code {
            401 => Self::Auth { status_code },
            404 => Self::NotFound {
                resource: resource.to_string(),
            },
            _ => Self::Api {
                status_code,
                message: if body.is_empty() {
                    format!("HTTP {}", status_code)
                } else {
                    body.to_string()
                },
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
