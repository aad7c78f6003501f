//! Error type at the remote-call boundary

/// A remote call that produced no usable response.
///
/// Non-2xx statuses are not errors; they come back as a normal [`Page`](crate::Page).
#[derive(Debug)]
pub enum FetchError {
    /// Transport-level fault (DNS, connection refused, TLS) with no response
    NoResponse { message: String },
    /// The per-request deadline elapsed
    Timeout,
    /// A 2xx response whose body could not be decoded
    Malformed { status: u16, message: String },
    /// A later page of a paginated fetch came back non-2xx
    Incomplete { status: u16, page: u32 },
    /// The lookup key cannot be turned into a request
    InvalidKey { key: String },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResponse { message } => write!(f, "no response: {message}"),
            Self::Timeout => f.write_str("request deadline exceeded"),
            Self::Malformed { status, message } => {
                write!(f, "HTTP {status}: undecodable body: {message}")
            }
            Self::Incomplete { status, page } => write!(f, "HTTP {status} on page {page}"),
            Self::InvalidKey { key } => write!(f, "invalid lookup key '{key}'"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn no_response(message: impl Into<String>) -> Self {
        Self::NoResponse {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidKey { .. })
    }
}
