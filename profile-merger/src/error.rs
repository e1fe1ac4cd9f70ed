use reqwest::StatusCode;
use thiserror::Error;

/// Raised when selection finished without a canonical profile for some duplicate group.
/// Selection always succeeds for non-empty groups, so this means an upstream contract was
/// broken (e.g. an empty group reached the selector).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("no canonical profile selected for {} email group(s): {}", .missing.len(), .missing.join(", "))]
pub struct IncompleteSelectionError {
    pub missing: Vec<String>,
}

/// Event merges only ever pair events that share a name. A mismatch means the caller
/// looked events up by the wrong key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventMergeError {
    #[error("cannot merge event {incoming} into event {existing}")]
    NameMismatch { existing: String, incoming: String },
    #[error("merged count of event {name} overflows")]
    CountOverflow { name: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    IncompleteSelection(#[from] IncompleteSelectionError),
    #[error("merge failed for {email}: {source}")]
    EventMerge {
        email: String,
        #[source]
        source: EventMergeError,
    },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Errors from handing batches to a sink. Batches sent before the failing one are not
/// rolled back.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: StatusCode,
        message: String,
    },
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmitError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            EmitError::Status { status, .. } => Some(*status),
            EmitError::Request { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} line {line}: {source}")]
    Parse {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_selection_message_lists_emails() {
        let err = IncompleteSelectionError {
            missing: vec!["a@example.com".to_string(), "b@example.com".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "no canonical profile selected for 2 email group(s): a@example.com, b@example.com"
        );
    }

    #[test]
    fn test_status_error_exposes_status() {
        let err = EmitError::Status {
            endpoint: "/users/track".to_string(),
            status: StatusCode::BAD_REQUEST,
            message: "bad".to_string(),
        };
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert!(err.to_string().contains("400"));
    }
}
