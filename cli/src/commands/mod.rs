// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Conductor CLI

pub mod config;
pub mod migrate;
pub mod plan;

pub use self::config::ConfigCommand;
