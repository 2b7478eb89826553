//! Error types for proxy operations

use intercept_common::{ModificationError, TransportError};
use std::fmt;

/// Main error type for proxy operations
#[derive(Debug)]
pub enum ProxyError {
    /// Network-related errors
    Network(String),
    /// Certificate-related errors
    Certificate(String),
    /// Configuration errors
    Configuration(String),
    /// Control plane could not be reached or refused a call
    Transport(TransportError),
    /// General I/O errors
    Io(std::io::Error),
}

/// Failure to write a field onto a live flow.
///
/// Returned before the flow is touched whenever the problem can be detected
/// up front, so a rejected modification leaves the flow as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    InvalidMethod(String),
    InvalidPath(String),
    InvalidHeader(String),
    InvalidModification(ModificationError),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Network(msg) => write!(f, "Network error: {}", msg),
            ProxyError::Certificate(msg) => write!(f, "Certificate error: {}", msg),
            ProxyError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ProxyError::Transport(err) => write!(f, "Transport error: {}", err),
            ProxyError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::InvalidMethod(method) => write!(f, "invalid method {:?}", method),
            FlowError::InvalidPath(path) => write!(f, "invalid path {:?}", path),
            FlowError::InvalidHeader(name) => write!(f, "invalid header {:?}", name),
            FlowError::InvalidModification(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(err) => Some(err),
            ProxyError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for FlowError {}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err)
    }
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        ProxyError::Transport(err)
    }
}

impl From<ModificationError> for FlowError {
    fn from(err: ModificationError) -> Self {
        FlowError::InvalidModification(err)
    }
}
