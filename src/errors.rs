use thiserror::Error;

/// Failure to turn one push-channel frame into a [`StreamEvent`](crate::feed::events::StreamEvent).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a json object")]
    NotAnObject,

    #[error("delete without id")]
    DeleteWithoutId,

    #[error("unrecognized message shape")]
    Unrecognized,

    #[error("invalid transaction record: {0}")]
    InvalidTransaction(String),
}

/// Remote request/response failures (snapshot, delete, simulate, login, logs).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response body from {endpoint}: {reason}")]
    Body { endpoint: String, reason: String },
}

impl ApiError {
    pub fn status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            ApiError::Status { status, .. } => is_retryable_http_status(*status),
            ApiError::Body { .. } => false,
        }
    }
}

pub fn is_retryable_http_status(status: u16) -> bool {
    matches!(status,
        408 |   // Request Timeout
        429 |   // Too Many Requests
        500 |   // Internal Server Error
        502 |   // Bad Gateway
        503 |   // Service Unavailable
        504     // Gateway Timeout
    )
}

/// Push-channel transport failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("closed by peer")]
    ClosedByPeer,
}

/// An operation that is illegal in the connection's current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition: {event} while {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_http_status(503));
        assert!(is_retryable_http_status(429));
        assert!(!is_retryable_http_status(404));
        assert!(!is_retryable_http_status(401));
    }

    #[test]
    fn test_status_error_message_carries_body() {
        let err = ApiError::status("DELETE /fraud/transactions/x", 500, "boom");
        assert_eq!(
            err.to_string(),
            "DELETE /fraud/transactions/x returned 500: boom"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError {
            state: "connected",
            event: "begin_connect",
        };
        assert_eq!(err.to_string(), "invalid transition: begin_connect while connected");
    }
}
