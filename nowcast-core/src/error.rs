use thiserror::Error;

/// Closed set of failure categories surfaced by a resolution attempt.
///
/// Every failure is returned as a value to the caller of
/// [`resolve`](crate::resolver::LocationWeatherResolver::resolve); nothing in
/// the core panics or terminates the process. Each failure is scoped to a
/// single attempt and leaves the resolver reusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Position could not be acquired: permission denied, capability absent,
    /// or no answer within the configured timeout.
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    /// Transport-level failure reaching the weather provider, including a
    /// fetch timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Provider was reachable but answered with a non-success status.
    #[error("provider returned status {status}: {message}")]
    Provider { status: u16, message: String },

    /// Response received but not interpretable as a weather snapshot.
    #[error("could not interpret provider response: {0}")]
    Parse(String),

    /// A resolution is already in flight on this resolver instance.
    #[error("a resolution is already in flight")]
    Busy,

    /// The in-flight resolution was aborted by the caller.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// A short, non-technical line suitable for direct display.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::LocationUnavailable(_) => {
                "Could not determine your location. Check your connection and try again."
            }
            ErrorKind::Network(_) => "Unable to reach the weather service. Check your connection.",
            ErrorKind::Provider { status, .. } if *status >= 500 => {
                "The weather service is having trouble. Please try again later."
            }
            ErrorKind::Provider { .. } => "The weather service rejected the request.",
            ErrorKind::Parse(_) => "Received an unexpected answer from the weather service.",
            ErrorKind::Busy => "A weather lookup is already running.",
            ErrorKind::Cancelled => "Lookup cancelled.",
        }
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ErrorKind::Network("request timed out".to_string())
        } else {
            ErrorKind::Network(e.to_string())
        }
    }
}
