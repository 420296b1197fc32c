// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authsync: client-side session maintenance.
//!
//! Keeps one bearer credential valid across many concurrent callers:
//! single-flight renewal, FIFO admission while a renewal is in flight,
//! deduplication of identical calls, one reactive renewal-and-replay per
//! credential-invalid rejection, and logout propagation to every context of
//! an origin.

pub mod broadcast;
pub mod config;
pub mod context;
pub mod credential;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use crate::config::SessionConfig;
pub use crate::context::SessionContext;
pub use crate::endpoint::{ApiRequest, ApiResponse, CallFamily, Method};
pub use crate::error::SessionError;
pub use crate::events::{LogoutOrigin, SessionEvent};
