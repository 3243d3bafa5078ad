use std::fmt;
use thiserror::Error;

/// Wire-visible classification of a protocol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Message,
    Association,
    Auth,
    AuthRealm,
    Verify,
    Discovery,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message-error",
            Self::Association => "association-error",
            Self::Auth => "auth-error",
            Self::AuthRealm => "auth-realm-error",
            Self::Verify => "verify-error",
            Self::Discovery => "discovery-error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Message(String),
    #[error("association failed: {0}")]
    Association(String),
    #[error("invalid authentication message: {0}")]
    Auth(String),
    #[error("realm verification failed: {0}")]
    AuthRealm(String),
    #[error("signature verification failed: {0}")]
    Verify(String),
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("http transport error")]
    Fetch(#[from] crate::http::FetchError),
}

impl Error {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Message(_) | Self::Fetch(_) => ErrorCode::Message,
            Self::Association(_) => ErrorCode::Association,
            Self::Auth(_) => ErrorCode::Auth,
            Self::AuthRealm(_) => ErrorCode::AuthRealm,
            Self::Verify(_) => ErrorCode::Verify,
            Self::Discovery(_) => ErrorCode::Discovery,
        }
    }

    /// Build an error of the given code.
    #[must_use]
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::Message => Self::Message(message),
            ErrorCode::Association => Self::Association(message),
            ErrorCode::Auth => Self::Auth(message),
            ErrorCode::AuthRealm => Self::AuthRealm(message),
            ErrorCode::Verify => Self::Verify(message),
            ErrorCode::Discovery => Self::Discovery(message),
        }
    }

    /// Human readable description without the code prefix.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Message(m)
            | Self::Association(m)
            | Self::Auth(m)
            | Self::AuthRealm(m)
            | Self::Verify(m)
            | Self::Discovery(m) => m.clone(),
            Self::Fetch(e) => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_constructor() {
        for code in [
            ErrorCode::Message,
            ErrorCode::Association,
            ErrorCode::Auth,
            ErrorCode::AuthRealm,
            ErrorCode::Verify,
            ErrorCode::Discovery,
        ] {
            let err = Error::with_code(code, "boom");
            assert_eq!(err.code(), code);
            assert_eq!(err.description(), "boom");
        }
    }

    #[test]
    fn wire_names() {
        assert_eq!(ErrorCode::AuthRealm.as_str(), "auth-realm-error");
        assert_eq!(ErrorCode::Association.to_string(), "association-error");
    }
}
