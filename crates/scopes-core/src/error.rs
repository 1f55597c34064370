use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Config,
    InvalidArgument,
    ObjectNotExist,
    Timeout,
    MiddlewareStopped,
    NotFound,
    Logic,
    Provider,
    Transport,
}

impl ErrorCode {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::InvalidArgument => "invalid_argument",
            Self::ObjectNotExist => "object_not_exist",
            Self::Timeout => "timeout",
            Self::MiddlewareStopped => "middleware_stopped",
            Self::NotFound => "not_found",
            Self::Logic => "logic",
            Self::Provider => "provider",
            Self::Transport => "transport",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopesError {
    pub code: ErrorCode,
    pub detail: String,
}

impl ScopesError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, detail)
    }

    pub fn logic(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Logic, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, detail)
    }
}

impl std::fmt::Display for ScopesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_tag(), self.detail)
    }
}

impl std::error::Error for ScopesError {}

pub type ScopesResult<T> = Result<T, ScopesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_code_tag() {
        let err = ScopesError::config("Invalid middleware kind: carrier-pigeon");
        assert_eq!(
            err.to_string(),
            "config: Invalid middleware kind: carrier-pigeon"
        );
    }

    #[test]
    fn error_survives_the_wire_as_json() {
        let err = ScopesError::new(ErrorCode::ObjectNotExist, "no servant for query-7");
        let json = serde_json::to_string(&err).expect("serialize error");
        assert!(json.contains("\"object_not_exist\""));
        let parsed: ScopesError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, err);
    }
}
