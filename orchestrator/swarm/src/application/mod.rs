// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination application services
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Messaging bus, blocking ledger and the adapter the core
//!   engine talks to

pub mod blocking;
pub mod coordination;
pub mod messaging;
pub mod services;

pub use blocking::BlockingCoordinator;
pub use coordination::SwarmCoordination;
pub use messaging::{FetchOptions, MessagingService, PublishMessage};
pub use services::SwarmServices;
