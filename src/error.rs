use thiserror::Error;

/// Errors surfaced by the Paymo client and everything built on it.
#[derive(Debug, Error)]
pub enum PaymoError {
    /// Missing or rejected API key. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed caller input, rejected before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The referenced resource does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// Still throttled after the whole backoff budget was spent.
    #[error("rate limited by Paymo after {attempts} attempts")]
    RateLimit { attempts: u32 },

    /// Any other non-success response.
    #[error("Paymo API error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote answered with a body we could not map onto our records.
    #[error("unexpected response from Paymo: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid timesheet document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PaymoError>;

impl PaymoError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Stable machine-readable name, used in tool payloads and batch outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Validation(_) | Self::Yaml(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::RateLimit { .. } => "rate_limit",
            Self::Remote { .. } => "remote",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Io(_) | Self::Csv(_) => "io",
        }
    }

    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            "validation" => 2,
            "auth" => 3,
            "not_found" => 4,
            "rate_limit" => 5,
            "remote" => 6,
            "transport" => 7,
            _ => 1,
        }
    }
}
