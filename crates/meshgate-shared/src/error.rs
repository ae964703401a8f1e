use thiserror::Error;

/// Non-fatal failures raised while handling local-client or peer input.
///
/// None of these terminate a session or the process; each maps to an
/// error reply with a stable machine-readable [`code`](RelayError::code).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Channel '{0}' is not eligible for relay")]
    PolicyViolation(String),

    #[error("Not joined to channel '{0}'")]
    NotJoined(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Malformed(_) => "malformed",
            RelayError::MissingField(_) => "missing-field",
            RelayError::NotFound(_) => "not-found",
            RelayError::Unauthorized => "unauthorized",
            RelayError::PolicyViolation(_) => "policy-violation",
            RelayError::NotJoined(_) => "not-joined",
            RelayError::UnknownCommand(_) => "unknown-command",
            RelayError::Transport(_) => "transport",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
