// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Service wiring for the configured storage backend
//! - The HTTP API and its SSE event relay
//! - Background workers (cascades, proactive compaction, message purge)
//! - Graceful shutdown

pub mod error;
pub mod extract;
pub mod routes;
pub mod server;
pub mod state;

pub use routes::router;
pub use server::start_daemon;
pub use state::AppState;
