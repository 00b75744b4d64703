//! Error types for link inspection and certificate validation.
//!
//! [`InspectError`] covers everything
//! that stops an inspection step from producing a result (the target is
//! unreachable, the HTTP exchange failed, bad input), while
//! [`ValidationError`] describes a certificate that was fetched fine but did
//! not pass validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use strum_macros::{Display, EnumString};

/// Coarse classification of every failure the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// DNS, TCP or TLS handshake failure: the target could not be reached.
    Connect,
    /// HTTP-level failure, including a TLS response without peer certificates.
    Request,
    /// Leaf issuer CN equals subject CN.
    SelfSigned,
    ChainVerification,
    Expired,
    NotYetValid,
    HostnameMismatch,
    Revoked,
    /// A stapled OCSP response was present but could not be used.
    Revocation,
    InvalidInput,
    Internal,
}

/// Reasons a fetched certificate chain is not valid.
///
/// `SelfSigned` is terminal: once it is reported no further check ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    /// Issuer common name equals subject common name
    SelfSigned,
    /// The chain does not lead to a trusted root
    ChainVerification {
        /// Verifier message
        details: String,
    },
    /// The leaf certificate is past its notAfter date
    Expired {
        /// notAfter as printed by OpenSSL
        not_after: String,
    },
    /// The leaf certificate is before its notBefore date
    NotYetValid {
        /// notBefore as printed by OpenSSL
        not_before: String,
    },
    /// The leaf certificate does not cover the inspected host
    HostnameMismatch {
        /// The host that was checked
        host: String,
    },
    /// The stapled OCSP response reports the leaf as revoked
    Revoked {
        /// Revocation reason from the OCSP response
        reason: String,
    },
    /// The stapled OCSP response could not be parsed or verified
    RevocationCheckFailed {
        /// Description of the failure
        reason: String,
    },
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SelfSigned => ErrorKind::SelfSigned,
            Self::ChainVerification { .. } => ErrorKind::ChainVerification,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::NotYetValid { .. } => ErrorKind::NotYetValid,
            Self::HostnameMismatch { .. } => ErrorKind::HostnameMismatch,
            Self::Revoked { .. } => ErrorKind::Revoked,
            Self::RevocationCheckFailed { .. } => ErrorKind::Revocation,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfSigned => write!(f, "The certificate is self-signed"),
            Self::ChainVerification { details } => {
                write!(f, "Failed to verify certificate chain: {}", details)
            }
            Self::Expired { not_after } => {
                write!(f, "The certificate is expired (not after {})", not_after)
            }
            Self::NotYetValid { not_before } => {
                write!(f, "The certificate is not yet valid (not before {})", not_before)
            }
            Self::HostnameMismatch { host } => {
                write!(f, "The certificate is not valid for host {}", host)
            }
            Self::Revoked { reason } => {
                write!(f, "The certificate has been revoked: {}", reason)
            }
            Self::RevocationCheckFailed { reason } => {
                write!(f, "Failed to check OCSP response: {}", reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Error type for a failed inspection step.
///
/// Connect-class variants (`DnsResolution`, `ConnectionFailed`,
/// `HandshakeFailed`, `Timeout`) mean the target was never inspected;
/// `Validation` means it was reachable but its certificate is not valid.
#[derive(Debug)]
pub enum InspectError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// Network operation timeout
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// The HTTP request failed or returned something unusable
    Request {
        /// Description of the failure
        details: String,
    },

    /// A response was delivered over TLS but carried no peer certificate
    NoPeerCertificates {
        /// The URL that was requested
        url: String,
    },

    /// Invalid input provided to the API
    InvalidInput {
        /// Which field/parameter was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },

    /// The certificate was fetched but failed validation
    Validation(ValidationError),

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },

    /// A generic error with a custom message
    Other {
        /// Error message
        message: String,
    },
}

impl InspectError {
    /// Maps the error onto the engine's failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DnsResolution { .. }
            | Self::ConnectionFailed { .. }
            | Self::HandshakeFailed { .. }
            | Self::Timeout { .. } => ErrorKind::Connect,
            Self::Request { .. } | Self::NoPeerCertificates { .. } => ErrorKind::Request,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Validation(e) => e.kind(),
            Self::OpenSSLError { .. } | Self::IoError { .. } | Self::Other { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// True when the target could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        self.kind() == ErrorKind::Connect
    }
}

impl fmt::Display for InspectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, .. } => {
                write!(f, "Failed to resolve hostname: {}", hostname)
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "Connection failed to: {} ({})", address, source)
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::Timeout { operation } => {
                write!(f, "Operation timed out: {}", operation)
            }
            Self::Request { details } => write!(f, "Request failed: {}", details),
            Self::NoPeerCertificates { url } => {
                write!(f, "no peer certificates for {}", url)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "Invalid input for '{}': {}", field, reason)
            }
            Self::Validation(e) => write!(f, "Certificate is not valid: {}", e),
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
            Self::Other { message } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for InspectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::IoError { source } => Some(source),
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for InspectError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<io::Error> for InspectError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout {
                operation: e.to_string(),
            },
            _ => Self::IoError { source: e },
        }
    }
}

impl From<&str> for InspectError {
    fn from(s: &str) -> Self {
        Self::Other {
            message: s.to_string(),
        }
    }
}

impl From<String> for InspectError {
    fn from(s: String) -> Self {
        Self::Other { message: s }
    }
}

impl From<openssl::error::ErrorStack> for InspectError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S: fmt::Debug> From<openssl::ssl::HandshakeError<S>> for InspectError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        match e {
            // A blocking socket only reports WouldBlock once its read/write timeout fires.
            openssl::ssl::HandshakeError::WouldBlock(_) => Self::Timeout {
                operation: "TLS handshake".to_string(),
            },
            other => Self::HandshakeFailed {
                details: format!("{}", other),
            },
        }
    }
}

impl From<reqwest::Error> for InspectError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                operation: format!("HTTP request: {}", e),
            }
        } else {
            Self::Request {
                details: e.to_string(),
            }
        }
    }
}
