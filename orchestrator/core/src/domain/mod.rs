// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model of the orchestration engine: aggregates, policy tables,
//! events and the persistence ports.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and rules; no I/O beyond the repository traits

pub mod agent;
pub mod batch;
pub mod capacity;
pub mod complexity;
pub mod conflict;
pub mod coordination;
pub mod decomposition;
pub mod error;
pub mod events;
pub mod lookup;
pub mod orchestrator_config;
pub mod repository;
pub mod scope;
pub mod session;
pub mod snapshot;
pub mod subtask;
pub mod tokens;
pub mod wave;
