use thiserror::Error;

/// Failure reported by a completion backend, already classified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("cannot reach completion backend: {0}")]
    Connectivity(String),
    #[error("completion backend rate limited the request: {0}")]
    RateLimited(String),
    #[error("completion backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Connectivity and rate-limit failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::RateLimited(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("completion circuit open; try later")]
    CircuitOpen,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Why a planner reply could not be turned into a plan.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("reply contains no JSON object")]
    NoJson,
    #[error("reply is not valid plan JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown intent `{0}`")]
    UnknownIntent(String),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("completion circuit open; try later")]
    CircuitOpen,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("missing argument `{0}`")]
    MissingArgument(String),
    #[error("refused: {0}")]
    Refused(String),
    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("{0}")]
    Collaborator(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot write config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid value `{value}` for environment override {key}")]
    InvalidEnvOverride { key: String, value: String },
}

/// Errors that escape a whole command. Everything else is absorbed
/// into the plan fallback or embedded in per-step outcomes.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("completion circuit open; try later")]
    CircuitOpen,
}

impl From<PlanError> for AgentError {
    fn from(value: PlanError) -> Self {
        match value {
            PlanError::CircuitOpen => Self::CircuitOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_and_rate_limit_are_transient() {
        assert!(BackendError::Connectivity("refused".to_owned()).is_transient());
        assert!(BackendError::RateLimited("slow down".to_owned()).is_transient());
        assert!(!BackendError::Status { status: 500, body: String::new() }.is_transient());
        assert!(!BackendError::Malformed("eof".to_owned()).is_transient());
    }

    #[test]
    fn tool_errors_render_user_readable_messages() {
        let err = ToolError::InvalidArgument { name: "by".to_owned(), reason: "unknown".to_owned() };
        assert_eq!(err.to_string(), "invalid argument `by`: unknown");
        assert_eq!(ToolError::MissingArgument("sql".to_owned()).to_string(), "missing argument `sql`");
    }
}
