// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conductor core
//!
//! Wave scheduling, batch aggregation, capacity backpressure and context
//! compaction for a swarm of coding agents.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and their stores. The
//!   HTTP surface and the messaging layer live in other crates.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
