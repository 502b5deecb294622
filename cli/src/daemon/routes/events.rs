// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server-Sent Events relay of the domain event bus. With `agent_id` the
//! stream is that agent's channel; without it every event is relayed.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use conductor_core::domain::agent::AgentId;
use conductor_core::infrastructure::event_bus::DomainEvent;

use crate::daemon::extract::ValidatedQuery;
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
}

pub async fn stream_events(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let agent = query.agent_id;
    let receiver = state.conductor.event_bus.raw_receiver();

    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let event = match item {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "SSE subscriber lagged behind the event bus");
                return None;
            }
        };
        if let Some(agent) = &agent {
            if !event.concerns(agent) {
                return None;
            }
        }
        to_sse(&event).map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &DomainEvent) -> Option<Event> {
    let name = match event {
        DomainEvent::Orchestration(_) => "orchestration",
        DomainEvent::Capacity(_) => "capacity",
        DomainEvent::Coordination(_) => "coordination",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!("Failed to encode event for SSE: {}", e);
            None
        }
    }
}
