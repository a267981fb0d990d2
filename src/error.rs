//! Error type returned by services wrapped in [`AdmissionLayer`](crate::AdmissionLayer).
use crate::admission::Denial;
use std::fmt;
use std::time::Duration;

/// Either the request was turned away at admission, or the inner service failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError<E> {
    /// Rejected before reaching the inner service.
    Denied(Denial),
    /// The underlying service failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(denial) => write!(f, "request denied: {}", denial),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if the request never reached the inner service
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
    /// Check if this error is due to an open circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Denied(Denial::CircuitOpen))
    }
    /// Check if this error is due to the rate limiter (including an active block)
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Denied(d) if d.is_rate_limited())
    }
    /// Access the denial, if any
    pub fn denial(&self) -> Option<Denial> {
        match self {
            Self::Denied(d) => Some(*d),
            Self::Inner(_) => None,
        }
    }
    /// Retry hint for rate-limit denials
    pub fn retry_after(&self) -> Option<Duration> {
        self.denial().and_then(|d| d.retry_after())
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn denied_display_carries_reason() {
        let err: AdmissionError<io::Error> = AdmissionError::Denied(Denial::RateLimited {
            retry_after: Duration::from_secs(5),
        });
        let msg = err.to_string();
        assert!(msg.contains("request denied"));
        assert!(msg.contains("retry after 5s"));
        assert!(err.is_rate_limited());
        assert!(!err.is_circuit_open());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert!(err.source().is_none());
    }

    #[test]
    fn inner_error_is_transparent() {
        let err = AdmissionError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_some());
        assert!(!err.is_denied());
        assert_eq!(err.into_inner().unwrap().to_string(), "boom");
    }

    #[test]
    fn circuit_open_predicates() {
        let err: AdmissionError<io::Error> = AdmissionError::Denied(Denial::CircuitOpen);
        assert!(err.is_denied());
        assert!(err.is_circuit_open());
        assert!(!err.is_rate_limited());
        assert_eq!(err.retry_after(), None);
        assert!(err.as_inner().is_none());
    }
}
