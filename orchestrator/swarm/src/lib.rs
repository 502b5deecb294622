// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `conductor-swarm` — Inter-Agent Coordination
//!
//! Messaging between agents and the ledger of who is blocked on whom.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Message`, `MessageTopic`, `Subscription`, `BlockingRelation`, store ports |
//! | [`application`] | Application | `MessagingService`, `BlockingCoordinator`, `SwarmCoordination` |
//! | [`infrastructure`] | Infrastructure | In-memory and PostgreSQL stores |
//!
//! ## Key Concepts
//!
//! - **Broadcast**: a message with no recipient, returned to every agent that
//!   fetches with `include_broadcasts`.
//! - **Read marking**: fetching a message records the reader; the unread count
//!   returned with a fetch is taken after that marking.
//! - **Blocking**: a relation between two agents, upserted by pair. Agents
//!   learn about changes through their event channel.
//!
//! The core engine reaches this crate only through
//! [`SwarmCoordination`](application::SwarmCoordination), its
//! `CoordinationPort` implementation.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
