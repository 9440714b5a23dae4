use crate::checker::Stage;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("an I/O error occurred: {0}")]
    GenericIo(#[from] std::io::Error),

    #[error("database error: {0}")]
    DatabaseError(#[from] libsql::Error),

    #[error("http client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("deserialization error: {0}")]
    DeserializeError(#[from] serde::de::value::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("checker '{0}' is registered more than once")]
    DuplicateChecker(String),

    #[error("no checker named '{0}' is registered")]
    UnknownChecker(String),

    #[error("check failed: {0}")]
    Check(#[from] CheckError),

    #[error("aborted: {0}")]
    Aborted(&'static str),
}

/// The flavour of a failure that is expected to go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    Proxy,
    Connection,
    Http(u16),
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Proxy => f.write_str("proxy or TLS error"),
            Self::Connection => f.write_str("connection error"),
            Self::Http(status) => write!(f, "HTTP status {status}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient(TransientKind),
    Permanent,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Everything that can go wrong while a single checker runs.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{kind}: {message}")]
    Network {
        kind: TransientKind,
        message: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unexpected source format: {0}")]
    SourceFormat(String),

    #[error("malformed json from source: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid info key: {0}")]
    InvalidInfoKey(String),

    #[error("{operation} is not allowed while the check is {stage}")]
    Lifecycle {
        operation: &'static str,
        stage: Stage,
    },

    #[error("persistence error: {0}")]
    Persistence(#[source] Box<CheckerError>),
}

impl CheckError {
    pub fn network(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::SourceFormat(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { kind, .. } => FailureKind::Transient(*kind),
            _ => FailureKind::Permanent,
        }
    }
}

impl From<CheckerError> for CheckError {
    fn from(err: CheckerError) -> Self {
        Self::Persistence(Box::new(err))
    }
}

impl From<reqwest::Error> for CheckError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::InvalidRequest(err.to_string());
        }

        let kind = if err.is_timeout() {
            TransientKind::Timeout
        } else if let Some(status) = err.status() {
            TransientKind::Http(status.as_u16())
        } else if chain_mentions(&err, &["proxy", "tls", "certificate", "handshake"]) {
            TransientKind::Proxy
        } else {
            TransientKind::Connection
        };

        Self::Network {
            kind,
            message: chain_to_string(&err),
        }
    }
}

fn chain_to_string(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();

    let mut src = err.source();
    while let Some(err) = src {
        message.push_str(": ");
        message.push_str(&err.to_string());
        src = err.source();
    }

    message
}

fn chain_mentions(err: &dyn std::error::Error, needles: &[&str]) -> bool {
    let text = chain_to_string(err).to_lowercase();
    needles.iter().any(|needle| text.contains(needle))
}
