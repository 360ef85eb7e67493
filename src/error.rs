use thiserror::Error;

/// A malformed token surfaced by the [`crate::sieve::lexer`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct LexError {
    pub line: u32,
    pub reason: String,
}

/// A grammar, argument-schema, or capability-declaration violation surfaced
/// by the [`crate::sieve::parser`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            line: e.line,
            message: e.reason,
        }
    }
}

/// Socket/TLS failure or unexpected EOF on the ManageSieve transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("connection closed unexpectedly")]
    UnexpectedEof,
}

/// A malformed server response: unexpected tag, literal length mismatch,
/// or anything the response grammar could not parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unexpected tag in response: {0}")]
    UnexpectedTag(String),
    #[error("literal length mismatch: expected {expected} bytes")]
    LiteralLengthMismatch { expected: usize },
    #[error("server does not support STARTTLS")]
    StartTlsUnsupported,
}

/// SASL mechanism failure or an unsupported mechanism was requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("mechanism {0} is not supported by this server")]
    UnsupportedMechanism(String),
    #[error("sasl exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("server rejected credentials: {0}")]
    Rejected(String),
}

/// Server-returned `NO` with a diagnostic string. Non-fatal: the session
/// remains usable after this error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("server error: {0}")]
pub struct ServerError(pub String);

/// A wall-clock I/O deadline expired.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct TimeoutError(pub std::time::Duration);

/// Top-level error type unifying every subsystem failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}
