// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors produced by credential maintenance and the call pipeline.
///
/// `Clone` because a single renewal outcome is fanned out to every waiter
/// registered on that renewal cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The bearer string is not three dot-separated segments, or its payload
    /// is not a decodable JSON object.
    MalformedCredential(String),
    /// A required claim is absent or has the wrong type.
    MissingClaims(String),
    /// `CredentialStore::set` rejected a credential; the store was cleared.
    InvalidCredential(Box<SessionError>),
    /// The renewal endpoint rejected the request or was unreachable.
    RenewalFailure(String),
    /// A resource endpoint rejected the attached credential.
    CredentialInvalid { status: u16, body: serde_json::Value },
    /// A resource endpoint answered with a non-success status.
    Rejected { status: u16, body: serde_json::Value },
    /// The session was terminated while the call was waiting for admission.
    SessionTerminated,
    /// Transport-level failure (connection refused, body decode, ...).
    Transport(String),
    /// Shared storage could not be read or written.
    Storage(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedCredential(_) => "MALFORMED_CREDENTIAL",
            Self::MissingClaims(_) => "MISSING_CLAIMS",
            Self::InvalidCredential(_) => "INVALID_CREDENTIAL",
            Self::RenewalFailure(_) => "RENEWAL_FAILURE",
            Self::CredentialInvalid { .. } => "CREDENTIAL_INVALID",
            Self::Rejected { .. } => "REJECTED",
            Self::SessionTerminated => "SESSION_TERMINATED",
            Self::Transport(_) => "TRANSPORT",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Whether the application should send the user back through sign-in.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::RenewalFailure(_)
                | Self::SessionTerminated
                | Self::CredentialInvalid { .. }
                | Self::InvalidCredential(_)
        )
    }

    /// HTTP status carried by a response-derived error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::CredentialInvalid { status, .. } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCredential(msg) => write!(f, "malformed credential: {msg}"),
            Self::MissingClaims(msg) => write!(f, "missing claims: {msg}"),
            Self::InvalidCredential(inner) => write!(f, "invalid credential: {inner}"),
            Self::RenewalFailure(msg) => write!(f, "renewal failed: {msg}"),
            Self::CredentialInvalid { status, .. } => {
                write!(f, "credential rejected by endpoint ({status})")
            }
            Self::Rejected { status, body } => write!(f, "request rejected ({status}): {body}"),
            Self::SessionTerminated => f.write_str("session terminated"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidCredential(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
