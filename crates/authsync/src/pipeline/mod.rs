// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound call pipeline: deduplicate, admit, dispatch, replay.

pub mod admission;
pub mod client;
pub mod dedupe;
