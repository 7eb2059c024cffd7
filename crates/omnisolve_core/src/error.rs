use thiserror::Error;

/// Errors raised at the dispatcher boundary.
///
/// Failures inside a handler pass through `Handler` untouched, so callers see
/// the same message the numerical routine produced.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("Unknown problem type: {0}")]
    UnknownProblemType(String),

    #[error("Problem type already registered: {0}")]
    DuplicateProblemType(String),

    #[error("Invalid arguments for {problem_type}: {message}")]
    InvalidArguments {
        problem_type: String,
        message: String,
    },

    #[error("Failed to encode result of {problem_type}: {source}")]
    Encode {
        problem_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl SolveError {
    pub(crate) fn invalid(problem_type: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            problem_type: problem_type.to_string(),
            message: message.into(),
        }
    }
}
