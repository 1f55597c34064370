use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Error,
    Cancelled,
}

impl CompletionStatus {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionDetails {
    pub status: CompletionStatus,
    #[serde(default)]
    pub message: String,
}

impl CompletionDetails {
    pub fn new(status: CompletionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn completed() -> Self {
        Self::new(CompletionStatus::Completed, "")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(CompletionStatus::Error, message)
    }

    pub fn cancelled() -> Self {
        Self::new(CompletionStatus::Cancelled, "")
    }
}

impl std::fmt::Display for CompletionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status.as_tag())
        } else {
            write!(f, "{}: {}", self.status.as_tag(), self.message)
        }
    }
}
