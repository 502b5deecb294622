// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conductor CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Clap commands and the HTTP daemon over the core and swarm crates

pub mod commands;
pub mod daemon;
pub mod logging;
