//! Result sink errors.

/// Errors delivering a result to a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error status.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The service did not accept the API key.
    #[error("unauthorized (invalid API key)")]
    Unauthorized,

    #[error("invalid sink configuration: {0}")]
    Config(String),

    /// The receiving side has gone away.
    #[error("sink closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SinkError::Rejected {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "rejected with status 500: boom");
        assert_eq!(SinkError::Unauthorized.to_string(), "unauthorized (invalid API key)");
        assert_eq!(SinkError::Closed.to_string(), "sink closed");
        assert_eq!(
            SinkError::Config("bad url".into()).to_string(),
            "invalid sink configuration: bad url"
        );
    }
}
