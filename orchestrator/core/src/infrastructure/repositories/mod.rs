// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the store ports defined in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! - **InMemoryStore** - every port behind one lock; used by tests and the
//!   `in_memory` storage backend.
//! - **PostgresStore** - production store; counters change only through
//!   conditional updates, multi-row writes run in one transaction.
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo(database_url: &str) -> anyhow::Result<()> {
//! use conductor_core::infrastructure::repositories::PostgresStore;
//! use conductor_core::domain::repository::SessionRepository;
//! use conductor_core::domain::session::SessionId;
//!
//! let pool = sqlx::PgPool::connect(database_url).await?;
//! let store = PostgresStore::new(pool);
//! let session = store.get_or_create(&SessionId::from("s-1")).await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod postgres;
mod postgres_batch;
mod postgres_capacity;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
