// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator seams: the renewal endpoint and the resource endpoint family.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// HTTP method of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => anyhow::bail!("unsupported method: {other}"),
        }
    }
}

/// Which family an endpoint belongs to.
///
/// Renewal, login and provider-callback calls never wait on admission and
/// never trigger reactive renewal, so a renewal can never wait on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallFamily {
    Resource,
    Renewal,
    Login,
    ProviderCallback,
    Logout,
}

impl CallFamily {
    /// Whether calls of this family bypass admission and reactive renewal.
    pub fn is_auth_exempt(&self) -> bool {
        matches!(self, Self::Renewal | Self::Login | Self::ProviderCallback)
    }
}

/// One outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub requires_credential: bool,
    pub family: CallFamily,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            requires_credential: true,
            family: CallFamily::Resource,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send without a credential.
    pub fn anonymous(mut self) -> Self {
        self.requires_credential = false;
        self
    }

    pub fn family(mut self, family: CallFamily) -> Self {
        self.family = family;
        self
    }
}

/// Response from a resource endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a fresh bearer credential from ambient session context
/// (e.g. an HTTP-only refresh cookie).
pub trait RenewalEndpoint: Send + Sync {
    fn renew(&self) -> Pin<Box<dyn Future<Output = Result<String, SessionError>> + Send + '_>>;
}

/// Executes arbitrary application calls.
///
/// Non-success statuses are returned as responses, not errors; the
/// pipeline decides which statuses mean "credential invalid".
pub trait ResourceEndpoint: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, SessionError>> + Send + 'a>>;
}
