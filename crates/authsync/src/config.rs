// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::CallFamily;

/// Configuration for one session context.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the application API.
    #[arg(long, default_value = "http://127.0.0.1:3000", env = "AUTHSYNC_API_URL")]
    pub api_url: String,

    /// Path of the renewal endpoint.
    #[arg(long, default_value = "/auth/refresh", env = "AUTHSYNC_RENEWAL_PATH")]
    pub renewal_path: String,

    /// Path of the logout endpoint.
    #[arg(long, default_value = "/auth/logout", env = "AUTHSYNC_LOGOUT_PATH")]
    pub logout_path: String,

    /// Login endpoint paths (comma-separated).
    #[arg(long = "login-path", value_delimiter = ',', default_value = "/auth/login", env = "AUTHSYNC_LOGIN_PATHS")]
    pub login_paths: Vec<String>,

    /// Path prefix of identity-provider callbacks.
    #[arg(long, default_value = "/auth/callback", env = "AUTHSYNC_CALLBACK_PREFIX")]
    pub callback_prefix: String,

    /// Renew this many seconds before the credential expires.
    #[arg(long, default_value_t = 600, env = "AUTHSYNC_RENEW_MARGIN_SECS")]
    pub renew_margin_secs: u64,

    /// Seconds after which a pending call stops absorbing identical calls.
    #[arg(long, default_value_t = 30, env = "AUTHSYNC_DEDUPE_STALE_SECS")]
    pub dedupe_stale_secs: u64,

    /// Stale pending-call sweep interval in milliseconds.
    #[arg(long, default_value_t = 5000, env = "AUTHSYNC_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    /// Name of the cross-context broadcast channel.
    #[arg(long, default_value = "auth", env = "AUTHSYNC_CHANNEL_NAME")]
    pub channel_name: String,

    /// Shared storage key of the logout sentinel.
    #[arg(long, default_value = "logout-event", env = "AUTHSYNC_STORAGE_KEY")]
    pub storage_key: String,

    /// JSON file backing shared storage. In-memory when unset.
    #[arg(long, env = "AUTHSYNC_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// HTTP request timeout in milliseconds. No timeout when unset.
    #[arg(long, env = "AUTHSYNC_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: Option<u64>,

    /// Use broadcast channels; `false` forces the storage fallback.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "AUTHSYNC_BROADCAST_CHANNELS")]
    pub broadcast_channels: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".into(),
            renewal_path: "/auth/refresh".into(),
            logout_path: "/auth/logout".into(),
            login_paths: vec!["/auth/login".into()],
            callback_prefix: "/auth/callback".into(),
            renew_margin_secs: 600,
            dedupe_stale_secs: 30,
            sweep_interval_ms: 5000,
            channel_name: "auth".into(),
            storage_key: "logout-event".into(),
            storage_path: None,
            http_timeout_ms: None,
            broadcast_channels: true,
        }
    }
}

impl SessionConfig {
    pub fn renew_margin(&self) -> Duration {
        Duration::from_secs(self.renew_margin_secs)
    }

    pub fn dedupe_stale_after(&self) -> Duration {
        Duration::from_secs(self.dedupe_stale_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_ms.map(Duration::from_millis)
    }

    /// Classify a request path into its endpoint family.
    pub fn family_for(&self, path: &str) -> CallFamily {
        let path = path.split('?').next().unwrap_or(path);
        if path == self.renewal_path {
            CallFamily::Renewal
        } else if path == self.logout_path {
            CallFamily::Logout
        } else if self.login_paths.iter().any(|p| p == path) {
            CallFamily::Login
        } else if !self.callback_prefix.is_empty() && path.starts_with(&self.callback_prefix) {
            CallFamily::ProviderCallback
        } else {
            CallFamily::Resource
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
