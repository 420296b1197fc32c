// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer credential model and claim decoding.
//!
//! A credential is a server-issued token of the form
//! `base64url(header).base64url(payload).base64url(signature)`. Only the
//! payload is read; the signature is never verified client-side.

pub mod refresh;
pub mod store;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SessionError;

/// Claims every well-formed credential carries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject identifier.
    pub sub: String,
    pub role: String,
    /// Monotonically increasing version, bumped server-side on revocation.
    pub token_version: u64,
    /// Whether the user asked to stay signed in.
    pub keep_logged_in: bool,
    /// Expiry, seconds since epoch.
    pub exp: u64,
    /// Issued-at, seconds since epoch.
    #[serde(default)]
    pub iat: Option<u64>,
}

/// A decoded bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    raw: String,
    claims: Claims,
}

impl Credential {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn role(&self) -> &str {
        &self.claims.role
    }

    /// Expiry as epoch milliseconds.
    pub fn expires_at_ms(&self) -> u64 {
        self.claims.exp.saturating_mul(1000)
    }
}

/// Decode a raw bearer string into a [`Credential`].
///
/// Fails with [`SessionError::MalformedCredential`] when the structure is
/// wrong and [`SessionError::MissingClaims`] when a required claim is absent
/// or mistyped.
pub fn decode(raw: &str) -> Result<Credential, SessionError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::MalformedCredential(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| SessionError::MalformedCredential(format!("payload is not base64url: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedCredential(format!("payload is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(SessionError::MalformedCredential("payload is not an object".into()));
    }
    let claims: Claims =
        serde_json::from_value(value).map_err(|e| SessionError::MissingClaims(e.to_string()))?;

    Ok(Credential { raw: raw.to_owned(), claims })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
