use std::time::Duration;

/// Failures the AI collaborator can produce. Split into three families:
/// fatal (the request itself is wrong, retrying cannot help), retryable
/// (infrastructure hiccups worth another attempt), and operational
/// (timeouts and cancellation, handled by the caller's control flow).
#[derive(Clone, Debug, thiserror::Error)]
pub enum AiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("service overloaded")]
    Overloaded,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Overloaded => true,
            Self::ServerError { .. } | Self::NetworkError(_) | Self::StreamInterrupted(_) => true,
            Self::Unauthorized(_) | Self::InvalidRequest(_) => false,
            Self::Timeout(_) | Self::Cancelled => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::InvalidRequest(_))
    }

    /// Server-suggested backoff, when the failure carried one.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable label for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map an HTTP response status from the AI service onto the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::InvalidRequest(body),
            401 | 403 => Self::Unauthorized(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::Overloaded,
            s if (500..600).contains(&s) => Self::ServerError { status, body },
            s => Self::InvalidRequest(format!("unexpected status {s}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_failures_are_retryable() {
        let retryable = [
            AiError::RateLimited { retry_after: None },
            AiError::Overloaded,
            AiError::ServerError {
                status: 500,
                body: "internal".into(),
            },
            AiError::NetworkError("connection reset".into()),
            AiError::StreamInterrupted("eof".into()),
        ];
        for e in retryable {
            assert!(e.is_retryable(), "{e} should be retryable");
            assert!(!e.is_fatal(), "{e} should not be fatal");
        }
    }

    #[test]
    fn bad_requests_are_fatal_not_retryable() {
        for e in [
            AiError::Unauthorized("expired".into()),
            AiError::InvalidRequest("missing field".into()),
        ] {
            assert!(e.is_fatal(), "{e} should be fatal");
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn operational_errors_are_neither() {
        for e in [AiError::Timeout(Duration::from_secs(30)), AiError::Cancelled] {
            assert!(!e.is_fatal());
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn only_rate_limits_carry_a_delay_hint() {
        let limited = AiError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(limited.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(AiError::Overloaded.suggested_delay(), None);
        assert_eq!(
            AiError::RateLimited { retry_after: None }.suggested_delay(),
            None
        );
    }

    #[test]
    fn status_mapping() {
        assert!(AiError::from_status(400, "bad".into()).is_fatal());
        assert!(AiError::from_status(401, "no".into()).is_fatal());
        assert!(AiError::from_status(403, "no".into()).is_fatal());
        assert!(AiError::from_status(429, "slow down".into()).is_retryable());
        assert!(matches!(
            AiError::from_status(503, "busy".into()),
            AiError::Overloaded
        ));
        assert!(matches!(
            AiError::from_status(529, "busy".into()),
            AiError::Overloaded
        ));
        assert!(matches!(
            AiError::from_status(502, "bad gateway".into()),
            AiError::ServerError { status: 502, .. }
        ));
        assert!(AiError::from_status(302, "redirect".into()).is_fatal());
    }

    #[test]
    fn kinds_match_variants() {
        assert_eq!(AiError::Cancelled.error_kind(), "cancelled");
        assert_eq!(AiError::Overloaded.error_kind(), "overloaded");
        assert_eq!(
            AiError::StreamInterrupted("cut".into()).error_kind(),
            "stream_interrupted"
        );
    }
}
