// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP backend for the renewal and resource endpoints.
//!
//! One `reqwest` client with a cookie store serves both roles, so the
//! HTTP-only refresh cookie set at login rides along on renewal calls.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::SessionConfig;
use crate::endpoint::{ApiRequest, ApiResponse, Method, RenewalEndpoint, ResourceEndpoint};
use crate::error::SessionError;

/// Body returned by the renewal endpoint.
#[derive(Debug, Deserialize)]
struct RenewalResponse {
    #[serde(rename = "accessToken", alias = "access_token", alias = "token")]
    access_token: String,
}

pub struct HttpBackend {
    base_url: String,
    renewal_path: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let mut builder = Client::builder().cookie_store(true);
        if let Some(timeout) = config.http_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            renewal_path: config.renewal_path.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn renew_inner(&self) -> Result<String, SessionError> {
        let resp = self.client.post(self.url(&self.renewal_path)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::RenewalFailure(format!("renewal endpoint answered {}", status.as_u16())));
        }
        let body: RenewalResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::RenewalFailure(format!("unreadable renewal response: {e}")))?;
        Ok(body.access_token)
    }

    async fn send_inner(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, SessionError> {
        let mut req = self.client.request(to_reqwest(request.method), self.url(&request.path));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        debug!(method = %request.method, path = %request.path, status, "response");
        Ok(ApiResponse::new(status, parse_body(&bytes)))
    }
}

impl RenewalEndpoint for HttpBackend {
    fn renew(&self) -> Pin<Box<dyn Future<Output = Result<String, SessionError>> + Send + '_>> {
        Box::pin(self.renew_inner())
    }
}

impl ResourceEndpoint for HttpBackend {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, SessionError>> + Send + 'a>> {
        Box::pin(self.send_inner(request, bearer))
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Empty bodies become `null`; bodies that are not JSON are kept as text.
fn parse_body(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
