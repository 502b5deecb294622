// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Wave Scheduler Application Service
//!
//! Owns the lifecycle of the waves of a session's current request. There is
//! no scheduler loop: every transition is a side effect of a call, and the
//! counters only move through the store's conditional updates.

use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::events::OrchestrationEvent;
use crate::domain::repository::{RequestRepository, WaveRepository};
use crate::domain::session::{Request, RequestId, SessionId};
use crate::domain::wave::{Wave, WaveId, WaveStatus};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of counting one task outcome against a wave.
#[derive(Debug, Clone, Serialize)]
pub struct WaveProgress {
    pub wave: Wave,
    /// False when the wave was already terminal or fully counted.
    pub counted: bool,
    /// Set only for the call that made the wave terminal.
    pub became_terminal: Option<WaveStatus>,
}

pub struct WaveScheduler {
    requests: Arc<dyn RequestRepository>,
    waves: Arc<dyn WaveRepository>,
    event_bus: Arc<EventBus>,
}

impl WaveScheduler {
    pub fn new(requests: Arc<dyn RequestRepository>, waves: Arc<dyn WaveRepository>, event_bus: Arc<EventBus>) -> Self {
        Self {
            requests,
            waves,
            event_bus,
        }
    }

    /// Newest request of the session, created implicitly when there is none.
    pub async fn current_request(&self, session: &SessionId) -> OrchestrationResult<Request> {
        if let Some(request) = self.requests.current_for_session(session).await? {
            return Ok(request);
        }
        let request = Request::new(session.clone(), None);
        self.requests.create(&request).await?;
        info!(session_id = %session, request_id = %request.id, "Created implicit request");
        Ok(request)
    }

    pub async fn get_or_create_wave(&self, session: &SessionId, wave_number: u32) -> OrchestrationResult<Wave> {
        let request = self.current_request(session).await?;
        Ok(self.waves.get_or_create(request.id, session, wave_number).await?)
    }

    /// Move the wave to `running`. Starting a running or terminal wave is a
    /// no-op that returns it unchanged.
    pub async fn start_wave(&self, session: &SessionId, wave_number: u32) -> OrchestrationResult<Wave> {
        let wave = self.get_or_create_wave(session, wave_number).await?;
        self.ensure_running(wave.id).await
    }

    /// `pending -> running` by id, emitting `WaveStarted` for the caller that
    /// applied it.
    pub async fn ensure_running(&self, wave_id: WaveId) -> OrchestrationResult<Wave> {
        let now = Utc::now();
        if let Some(wave) = self.waves.mark_running(wave_id, now).await? {
            info!(wave_id = %wave.id, wave_number = wave.wave_number, "Wave started");
            self.event_bus.publish_orchestration_event(OrchestrationEvent::WaveStarted {
                wave_id: wave.id,
                session_id: wave.session_id.clone(),
                request_id: wave.request_id,
                wave_number: wave.wave_number,
                started_at: now,
            });
            return Ok(wave);
        }
        self.waves
            .find_by_id(wave_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("wave {wave_id}")))
    }

    /// Waves of the session's current request, by wave number.
    pub async fn history(&self, session: &SessionId) -> OrchestrationResult<Vec<Wave>> {
        match self.requests.current_for_session(session).await? {
            Some(request) => Ok(self.waves.list_for_request(request.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Lowest running wave, else the highest started wave that already
    /// finished, else the lowest pending wave.
    pub async fn current_wave(&self, session: &SessionId) -> OrchestrationResult<Option<Wave>> {
        Ok(pick_current(self.history(session).await?))
    }

    /// Advance to the lowest existing wave after the current one. `None`
    /// unless the current wave is terminal and a later wave exists.
    pub async fn transition_to_next_wave(&self, session: &SessionId) -> OrchestrationResult<Option<Wave>> {
        let waves = self.history(session).await?;
        let Some(current) = pick_current(waves.clone()) else {
            return Ok(None);
        };
        if !current.is_terminal() {
            debug!(session_id = %session, wave_number = current.wave_number, "Current wave not terminal, not advancing");
            return Ok(None);
        }
        let next = waves
            .into_iter()
            .filter(|w| w.wave_number > current.wave_number)
            .min_by_key(|w| w.wave_number);
        match next {
            Some(next) => Ok(Some(self.ensure_running(next.id).await?)),
            None => Ok(None),
        }
    }

    /// Count one task outcome against the wave `(session's request, wave_number)`.
    pub async fn complete_task(
        &self,
        session: &SessionId,
        wave_number: u32,
        failed: bool,
    ) -> OrchestrationResult<WaveProgress> {
        let request = self.current_request(session).await?;
        let wave = self
            .waves
            .find(request.id, wave_number)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("wave {wave_number} of session {session}")))?;
        self.record_outcome(wave.id, failed).await
    }

    /// Atomically increment the wave's counters and, if that settled it,
    /// set the terminal status. `WaveTerminal` is published exactly once.
    pub async fn record_outcome(&self, wave_id: WaveId, failed: bool) -> OrchestrationResult<WaveProgress> {
        let counted = self.waves.increment_outcome(wave_id, failed).await?;
        let Some(wave) = counted else {
            let wave = self
                .waves
                .find_by_id(wave_id)
                .await?
                .ok_or_else(|| OrchestrationError::NotFound(format!("wave {wave_id}")))?;
            debug!(wave_id = %wave_id, status = %wave.status, "Wave outcome not counted");
            return Ok(WaveProgress {
                wave,
                counted: false,
                became_terminal: None,
            });
        };

        match self.waves.finalize_if_settled(wave_id, Utc::now()).await? {
            Some(terminal) => {
                self.announce_terminal(&terminal);
                Ok(WaveProgress {
                    became_terminal: Some(terminal.status),
                    wave: terminal,
                    counted: true,
                })
            }
            None => Ok(WaveProgress {
                wave,
                counted: true,
                became_terminal: None,
            }),
        }
    }

    pub async fn request_of(&self, id: RequestId) -> OrchestrationResult<Option<Request>> {
        Ok(self.requests.find(id).await?)
    }

    fn announce_terminal(&self, wave: &Wave) {
        info!(
            wave_id = %wave.id,
            wave_number = wave.wave_number,
            status = %wave.status,
            completed = wave.completed_tasks,
            failed = wave.failed_tasks,
            "Wave reached terminal status"
        );
        metrics::counter!("conductor_waves_terminal_total", "status" => wave.status.as_str()).increment(1);
        self.event_bus.publish_orchestration_event(OrchestrationEvent::WaveTerminal {
            wave_id: wave.id,
            session_id: wave.session_id.clone(),
            request_id: wave.request_id,
            wave_number: wave.wave_number,
            status: wave.status,
            total_tasks: wave.total_tasks,
            completed_tasks: wave.completed_tasks,
            failed_tasks: wave.failed_tasks,
            completed_at: wave.completed_at.unwrap_or_else(Utc::now),
        });
    }
}

pub(crate) fn pick_current(waves: Vec<Wave>) -> Option<Wave> {
    if let Some(running) = waves
        .iter()
        .filter(|w| w.status == WaveStatus::Running)
        .min_by_key(|w| w.wave_number)
    {
        return Some(running.clone());
    }
    if let Some(finished) = waves
        .iter()
        .filter(|w| w.is_terminal())
        .max_by_key(|w| w.wave_number)
    {
        return Some(finished.clone());
    }
    waves
        .into_iter()
        .filter(|w| w.status == WaveStatus::Pending)
        .min_by_key(|w| w.wave_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::SubtaskRepository;
    use crate::domain::subtask::{InitialStatus, Subtask};
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::repositories::InMemoryStore;

    fn scheduler() -> (WaveScheduler, InMemoryStore, Arc<EventBus>) {
        let store = InMemoryStore::new();
        let bus = Arc::new(EventBus::with_default_capacity());
        let scheduler = WaveScheduler::new(Arc::new(store.clone()), Arc::new(store.clone()), bus.clone());
        (scheduler, store, bus)
    }

    async fn add_tasks(store: &InMemoryStore, wave: &Wave, n: usize) {
        for i in 0..n {
            let task = Subtask::new(
                wave.session_id.clone(),
                wave.request_id,
                wave.id,
                wave.wave_number,
                format!("task {i}"),
                None,
                None,
                InitialStatus::Pending,
            );
            store.create_in_wave(&task).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_or_create_wave_is_idempotent() {
        let (scheduler, _, _) = scheduler();
        let session = SessionId::from("s1");
        let a = scheduler.get_or_create_wave(&session, 0).await.unwrap();
        let b = scheduler.get_or_create_wave(&session, 0).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(scheduler.history(&session).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_event_emitted_once_and_counters_bounded() {
        let (scheduler, store, bus) = scheduler();
        let session = SessionId::from("s1");
        let wave = scheduler.start_wave(&session, 1).await.unwrap();
        add_tasks(&store, &wave, 2).await;
        let mut events = bus.subscribe();

        let first = scheduler.complete_task(&session, 1, false).await.unwrap();
        assert!(first.became_terminal.is_none());
        let second = scheduler.complete_task(&session, 1, true).await.unwrap();
        assert_eq!(second.became_terminal, Some(WaveStatus::Failed));

        for _ in 0..3 {
            let extra = scheduler.complete_task(&session, 1, false).await.unwrap();
            assert!(!extra.counted);
            assert_eq!(extra.wave.status, WaveStatus::Failed);
            assert_eq!(extra.wave.completed_tasks + extra.wave.failed_tasks, 2);
        }

        let mut terminal_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DomainEvent::Orchestration(OrchestrationEvent::WaveTerminal { .. })) {
                terminal_events += 1;
            }
        }
        assert_eq!(terminal_events, 1);
    }

    #[tokio::test]
    async fn test_transition_requires_terminal_current_wave() {
        let (scheduler, store, _) = scheduler();
        let session = SessionId::from("s1");
        let wave0 = scheduler.start_wave(&session, 0).await.unwrap();
        scheduler.get_or_create_wave(&session, 2).await.unwrap();
        add_tasks(&store, &wave0, 1).await;

        assert!(scheduler.transition_to_next_wave(&session).await.unwrap().is_none());

        scheduler.complete_task(&session, 0, false).await.unwrap();
        let next = scheduler.transition_to_next_wave(&session).await.unwrap().unwrap();
        assert_eq!(next.wave_number, 2);
        assert_eq!(next.status, WaveStatus::Running);
        assert_eq!(scheduler.current_wave(&session).await.unwrap().unwrap().wave_number, 2);
    }

    #[tokio::test]
    async fn test_current_wave_prefers_running_then_latest_finished() {
        let (scheduler, store, _) = scheduler();
        let session = SessionId::from("s1");
        scheduler.get_or_create_wave(&session, 3).await.unwrap();
        assert_eq!(scheduler.current_wave(&session).await.unwrap().unwrap().wave_number, 3);

        let wave1 = scheduler.start_wave(&session, 1).await.unwrap();
        assert_eq!(scheduler.current_wave(&session).await.unwrap().unwrap().wave_number, 1);

        add_tasks(&store, &wave1, 1).await;
        scheduler.complete_task(&session, 1, false).await.unwrap();
        let current = scheduler.current_wave(&session).await.unwrap().unwrap();
        assert_eq!(current.wave_number, 1);
        assert_eq!(current.status, WaveStatus::Completed);
    }

    #[tokio::test]
    async fn test_complete_task_on_unknown_wave_is_not_found() {
        let (scheduler, _, _) = scheduler();
        let err = scheduler
            .complete_task(&SessionId::from("s1"), 7, false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound(_)));
    }
}
