// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Domain Layer
//!
//! Pure types for inter-agent messaging and blocking, plus the store ports.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`message`] | `Message`, `MessageTopic`, `MessagePayload`, `Priority` |
//! | [`subscription`] | `Subscription` |
//! | [`blocking`] | `BlockingRelation`, `BlockingStatus` |
//! | [`repository`] | `MessageRepository`, `SubscriptionRepository`, `BlockingRepository` |

pub mod blocking;
pub mod error;
pub mod message;
pub mod repository;
pub mod subscription;

pub use blocking::*;
pub use error::*;
pub use message::*;
pub use subscription::*;
