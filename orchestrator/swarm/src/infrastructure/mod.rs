// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory;
pub mod postgres;

pub use memory::InMemorySwarmStore;
pub use postgres::PostgresSwarmStore;
