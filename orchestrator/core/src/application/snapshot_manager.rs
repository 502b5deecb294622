// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Compact Snapshot Manager
//!
//! Saves point-in-time snapshots of a session and renders restore briefs
//! under a token budget.
//!
//! # Restore
//!
//! Snapshot-first: the newest snapshot is rendered section by section and
//! enriched with live, non-terminal subtasks it does not contain. Without a
//! snapshot the brief is assembled from live session state. Every live
//! lookup is secondary and degrades to an empty section.
//!
//! Marking the session compacted and resetting the agent's capacity is one
//! store write ([`CompactionLedger`]), so the two facts never diverge.

use super::capacity_controller::CapacityController;
use super::repository_factory::Stores;
use super::wave_scheduler::{pick_current, WaveScheduler};
use crate::domain::agent::{AgentContext, AgentId};
use crate::domain::coordination::CoordinationPort;
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::events::OrchestrationEvent;
use crate::domain::lookup::{DegradeExt, DegradedLookupError, IntoDegraded};
use crate::domain::repository::{
    AgentContextRepository, CompactionLedger, SessionRepository, SnapshotRepository, SubtaskRepository,
};
use crate::domain::session::SessionId;
use crate::domain::snapshot::{
    ActiveTaskEntry, AgentStateEntry, CompactionStatus, Snapshot, SnapshotContent, SnapshotId, SnapshotTrigger,
    WaveStateEntry,
};
use crate::domain::subtask::{Subtask, SubtaskStatus};
use crate::domain::tokens::truncate_to_budget;
use crate::domain::wave::Wave;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

/// Status order used when grouping tasks in a brief.
const STATUS_ORDER: [SubtaskStatus; 6] = [
    SubtaskStatus::Running,
    SubtaskStatus::Blocked,
    SubtaskStatus::Paused,
    SubtaskStatus::Pending,
    SubtaskStatus::Completed,
    SubtaskStatus::Failed,
];

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreRequest {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub compact_summary: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    Snapshot,
    Live,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreBrief {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub source: RestoreSource,
    pub snapshot_id: Option<SnapshotId>,
    pub brief: String,
    pub live_updates: usize,
    pub truncated: bool,
    pub compact_count: u32,
    /// Agent usage after the reset; `None` for an agent never metered.
    pub usage_after_reset: Option<u64>,
}

pub struct SnapshotManager {
    sessions: Arc<dyn SessionRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    contexts: Arc<dyn AgentContextRepository>,
    compaction: Arc<dyn CompactionLedger>,
    scheduler: Arc<WaveScheduler>,
    capacity: Arc<CapacityController>,
    coordination: Arc<dyn CoordinationPort>,
    event_bus: Arc<EventBus>,
    default_max_tokens: usize,
}

impl SnapshotManager {
    pub fn new(
        stores: &Stores,
        scheduler: Arc<WaveScheduler>,
        capacity: Arc<CapacityController>,
        coordination: Arc<dyn CoordinationPort>,
        event_bus: Arc<EventBus>,
        default_max_tokens: usize,
    ) -> Self {
        Self {
            sessions: stores.sessions.clone(),
            subtasks: stores.subtasks.clone(),
            snapshots: stores.snapshots.clone(),
            contexts: stores.contexts.clone(),
            compaction: stores.compaction.clone(),
            scheduler,
            capacity,
            coordination,
            event_bus,
            default_max_tokens,
        }
    }

    /// Append a snapshot and stamp the session's current request.
    pub async fn save(
        &self,
        session: &SessionId,
        trigger: SnapshotTrigger,
        content: SnapshotContent,
    ) -> OrchestrationResult<Snapshot> {
        if session.as_str().trim().is_empty() {
            return Err(OrchestrationError::Validation("session_id must not be empty".into()));
        }
        let request = self.scheduler.current_request(session).await?;
        let snapshot = Snapshot::new(session.clone(), Some(request.id), trigger, content);
        self.snapshots.append(&snapshot).await?;

        info!(
            session_id = %session,
            snapshot_id = %snapshot.id,
            trigger = trigger.as_str(),
            active_tasks = snapshot.active_tasks.len(),
            "Snapshot saved"
        );
        metrics::counter!("conductor_snapshots_saved_total", "trigger" => trigger.as_str()).increment(1);
        self.event_bus.publish_orchestration_event(OrchestrationEvent::SnapshotSaved {
            snapshot_id: snapshot.id,
            session_id: session.clone(),
            trigger,
            saved_at: snapshot.created_at,
        });
        Ok(snapshot)
    }

    pub async fn latest_snapshot(&self, session: &SessionId) -> OrchestrationResult<Option<Snapshot>> {
        Ok(self.snapshots.latest(session).await?)
    }

    pub async fn status(&self, session: &SessionId) -> OrchestrationResult<CompactionStatus> {
        let row = self
            .sessions
            .find(session)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("session {session}")))?;
        let latest = self.snapshots.latest(session).await?;
        Ok(CompactionStatus {
            session_id: row.id,
            compacted_at: row.compacted_at,
            compact_count: row.compact_count,
            snapshot_count: self.snapshots.count(session).await?,
            latest_snapshot_at: latest.as_ref().map(|s| s.created_at),
            latest_trigger: latest.map(|s| s.trigger),
        })
    }

    /// Render the restore brief, then record the compaction.
    pub async fn restore(&self, request: RestoreRequest) -> OrchestrationResult<RestoreBrief> {
        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        if max_tokens == 0 {
            return Err(OrchestrationError::Validation("max_tokens must be positive".into()));
        }
        if request.agent_id.as_str().trim().is_empty() {
            return Err(OrchestrationError::Validation("agent_id must not be empty".into()));
        }

        let session = &request.session_id;
        let (source, snapshot_id, rendered, live_updates) = match self.snapshots.latest(session).await? {
            Some(snapshot) => {
                let live: Vec<Subtask> = self
                    .live_subtasks(session)
                    .await
                    .or_degraded("restore")
                    .into_iter()
                    .filter(|s| !snapshot.contains_subtask(s.id))
                    .collect();
                let text = render_snapshot(&request, &snapshot, &live);
                (RestoreSource::Snapshot, Some(snapshot.id), text, live.len())
            }
            None => (RestoreSource::Live, None, self.render_live(&request).await, 0),
        };

        let brief = truncate_to_budget(&rendered, max_tokens);
        let truncated = brief.len() != rendered.len();

        let now = Utc::now();
        let record = self
            .compaction
            .record_compaction(session, &request.agent_id, self.capacity.policy(), now)
            .await?;
        if let Some((before, capacity)) = &record.capacity {
            self.capacity.announce_reset(*before, capacity);
        }
        self.event_bus.publish_orchestration_event(OrchestrationEvent::SessionCompacted {
            session_id: session.clone(),
            agent_id: request.agent_id.clone(),
            snapshot_id,
            compacted_at: now,
        });
        info!(
            session_id = %session,
            agent_id = %request.agent_id,
            source = ?source,
            live_updates,
            truncated,
            "Context restored"
        );

        Ok(RestoreBrief {
            session_id: session.clone(),
            agent_id: request.agent_id,
            source,
            snapshot_id,
            brief,
            live_updates,
            truncated,
            compact_count: record.session.compact_count,
            usage_after_reset: record.capacity.map(|(_, c)| c.current_usage),
        })
    }

    /// Snapshot content assembled from live session state.
    pub async fn capture_live(&self, session: &SessionId) -> SnapshotContent {
        let active = self.live_subtasks(session).await.or_degraded("capture_live");
        let waves = self.wave_history(session).await.or_degraded("capture_live");
        let contexts = self.agent_contexts(session).await.or_degraded("capture_live");

        let modified_files: BTreeSet<String> = contexts
            .iter()
            .flat_map(|c| c.files_touched.iter().cloned())
            .collect();
        let wave_state = pick_current(waves).as_ref().map(WaveStateEntry::from);

        SnapshotContent {
            context_summary: Some(format!(
                "Captured from live state: {} active task(s), {} agent(s)",
                active.len(),
                contexts.len()
            )),
            active_tasks: active.iter().map(ActiveTaskEntry::from).collect(),
            modified_files: modified_files.into_iter().collect(),
            key_decisions: Vec::new(),
            agent_states: contexts.iter().map(AgentStateEntry::from).collect(),
            wave_state,
        }
    }

    async fn live_subtasks(&self, session: &SessionId) -> Result<Vec<Subtask>, DegradedLookupError> {
        self.subtasks
            .list_active_for_session(session)
            .await
            .degrade("live subtasks")
    }

    async fn wave_history(&self, session: &SessionId) -> Result<Vec<Wave>, DegradedLookupError> {
        self.scheduler.history(session).await.degrade("wave history")
    }

    async fn agent_contexts(&self, session: &SessionId) -> Result<Vec<AgentContext>, DegradedLookupError> {
        self.contexts.list_for_session(session).await.degrade("agent contexts")
    }

    async fn render_live(&self, request: &RestoreRequest) -> String {
        let session = &request.session_id;
        let active = self.live_subtasks(session).await.or_degraded("restore");
        let waves = self.wave_history(session).await.or_degraded("restore");
        let contexts = self.agent_contexts(session).await.or_degraded("restore");
        let messages = self
            .coordination
            .pending_messages(&request.agent_id)
            .await
            .or_degraded("restore");
        let blocking = self
            .coordination
            .blocking_for(&request.agent_id)
            .await
            .or_degraded("restore");

        let mut out = header(request, "live session state (no snapshot)");
        compact_summary_section(&mut out, request);

        if let Some(wave) = pick_current(waves.clone()) {
            wave_section(&mut out, &WaveStateEntry::from(&wave));
        }
        let entries: Vec<ActiveTaskEntry> = active.iter().map(ActiveTaskEntry::from).collect();
        tasks_section(&mut out, "Active Tasks", &entries);
        let states: Vec<AgentStateEntry> = contexts.iter().map(AgentStateEntry::from).collect();
        agent_states_section(&mut out, &states);

        if !messages.is_empty() {
            out.push_str("\n## Pending Messages\n");
            for message in &messages {
                let _ = writeln!(
                    out,
                    "- [{}] from {} (priority {}): {}",
                    message.topic, message.from, message.priority, message.summary
                );
            }
        }
        if !blocking.is_empty() {
            out.push_str("\n## Blocking\n");
            for relation in &blocking {
                let _ = writeln!(out, "- {} blocks {}: {}", relation.blocker, relation.blocked, relation.reason);
            }
        }
        if !waves.is_empty() {
            out.push_str("\n## Wave History\n");
            for wave in &waves {
                let _ = writeln!(
                    out,
                    "- Wave {}: {} ({}/{} completed, {} failed)",
                    wave.wave_number, wave.status, wave.completed_tasks, wave.total_tasks, wave.failed_tasks
                );
            }
        }
        out
    }
}

fn header(request: &RestoreRequest, source: &str) -> String {
    let mut out = format!("# Context Restore: session {}\n", request.session_id);
    match &request.agent_type {
        Some(agent_type) => {
            let _ = writeln!(out, "Agent: {} ({})", request.agent_id, agent_type);
        }
        None => {
            let _ = writeln!(out, "Agent: {}", request.agent_id);
        }
    }
    let _ = writeln!(out, "Source: {source}");
    out
}

fn compact_summary_section(out: &mut String, request: &RestoreRequest) {
    if let Some(summary) = request.compact_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        let _ = write!(out, "\n## Compact Summary\n{}\n", summary.trim());
    }
}

fn wave_section(out: &mut String, wave: &WaveStateEntry) {
    let _ = write!(
        out,
        "\n## Wave State\nWave {}: {} ({}/{} completed, {} failed)\n",
        wave.wave_number, wave.status, wave.completed_tasks, wave.total_tasks, wave.failed_tasks
    );
}

fn task_line(out: &mut String, task: &ActiveTaskEntry) {
    let _ = write!(out, "- {}", task.description);
    if let Some(agent) = task.agent_id.as_ref().map(|a| a.as_str()).or(task.agent_type.as_deref()) {
        let _ = write!(out, " [{agent}]");
    }
    if let Some(wave) = task.wave_number {
        let _ = write!(out, " (wave {wave})");
    }
    out.push('\n');
}

fn tasks_section(out: &mut String, title: &str, tasks: &[ActiveTaskEntry]) {
    if tasks.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {title}");
    for status in STATUS_ORDER {
        let group: Vec<&ActiveTaskEntry> = tasks.iter().filter(|t| t.status == status).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {status}");
        for task in group {
            task_line(out, task);
        }
    }
}

fn list_section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {title}");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

fn agent_states_section(out: &mut String, states: &[AgentStateEntry]) {
    if states.is_empty() {
        return;
    }
    out.push_str("\n## Agent States\n");
    for state in states {
        let _ = write!(out, "- {}", state.agent_id);
        if let Some(agent_type) = &state.agent_type {
            let _ = write!(out, " ({agent_type})");
        }
        if !state.status.is_empty() {
            let _ = write!(out, ": {}", state.status);
        }
        if let Some(summary) = &state.summary {
            let _ = write!(out, " - {summary}");
        }
        out.push('\n');
    }
}

fn render_snapshot(request: &RestoreRequest, snapshot: &Snapshot, live: &[Subtask]) -> String {
    let source = format!(
        "snapshot {} ({}, {})",
        snapshot.id,
        snapshot.trigger,
        snapshot.created_at.to_rfc3339()
    );
    let mut out = header(request, &source);
    compact_summary_section(&mut out, request);
    if let Some(previous) = snapshot.context_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        let _ = write!(out, "\n## Previous Context\n{}\n", previous.trim());
    }
    if let Some(wave) = &snapshot.wave_state {
        wave_section(&mut out, wave);
    }
    tasks_section(&mut out, "Active Tasks", &snapshot.active_tasks);
    list_section(&mut out, "Key Decisions", &snapshot.key_decisions);
    list_section(&mut out, "Modified Files", &snapshot.modified_files);
    agent_states_section(&mut out, &snapshot.agent_states);

    if !live.is_empty() {
        let entries: Vec<ActiveTaskEntry> = live.iter().map(ActiveTaskEntry::from).collect();
        tasks_section(&mut out, "Live Updates (since snapshot)", &entries);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtask::InitialStatus;
    use crate::domain::capacity::{CapacityPolicy, TokenUsage};
    use crate::domain::coordination::NoopCoordination;
    use crate::domain::tokens::TRUNCATION_MARKER;

    struct Fixture {
        stores: Stores,
        scheduler: Arc<WaveScheduler>,
        capacity: Arc<CapacityController>,
        manager: SnapshotManager,
    }

    fn fixture() -> Fixture {
        let stores = Stores::in_memory();
        let bus = Arc::new(EventBus::with_default_capacity());
        let scheduler = Arc::new(WaveScheduler::new(stores.requests.clone(), stores.waves.clone(), bus.clone()));
        let capacity = Arc::new(CapacityController::new(
            stores.capacity.clone(),
            CapacityPolicy::default(),
            bus.clone(),
        ));
        let manager = SnapshotManager::new(
            &stores,
            scheduler.clone(),
            capacity.clone(),
            Arc::new(NoopCoordination),
            bus,
            4000,
        );
        Fixture {
            stores,
            scheduler,
            capacity,
            manager,
        }
    }

    fn restore_request(session: &SessionId, max_tokens: Option<usize>) -> RestoreRequest {
        RestoreRequest {
            session_id: session.clone(),
            agent_id: AgentId::from("agent-1"),
            agent_type: Some("backend-developer".into()),
            compact_summary: Some("Working on auth".into()),
            max_tokens,
        }
    }

    async fn running_subtask(f: &Fixture, session: &SessionId, description: &str) -> Subtask {
        let wave = f.scheduler.start_wave(session, 1).await.unwrap();
        let subtask = Subtask::new(
            session.clone(),
            wave.request_id,
            wave.id,
            1,
            description,
            Some("backend-developer".into()),
            Some(AgentId::from("agent-1")),
            InitialStatus::Running,
        );
        f.stores.subtasks.create_in_wave(&subtask).await.unwrap();
        subtask
    }

    #[tokio::test]
    async fn test_live_subtask_appears_under_live_updates() {
        let f = fixture();
        let session = SessionId::from("s1");
        let known = running_subtask(&f, &session, "write the token store").await;
        f.manager
            .save(
                &session,
                SnapshotTrigger::Manual,
                SnapshotContent {
                    context_summary: Some("Halfway through auth".into()),
                    active_tasks: vec![ActiveTaskEntry::from(&known)],
                    key_decisions: vec!["Use JWT".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        running_subtask(&f, &session, "wire the refresh endpoint").await;

        let brief = f.manager.restore(restore_request(&session, None)).await.unwrap();
        assert_eq!(brief.source, RestoreSource::Snapshot);
        assert_eq!(brief.live_updates, 1);
        let live_at = brief.brief.find("## Live Updates").unwrap();
        assert!(brief.brief[live_at..].contains("wire the refresh endpoint"));
        assert!(!brief.brief[live_at..].contains("write the token store"));
        let summary_at = brief.brief.find("## Compact Summary").unwrap();
        let previous_at = brief.brief.find("## Previous Context").unwrap();
        let decisions_at = brief.brief.find("## Key Decisions").unwrap();
        assert!(summary_at < previous_at && previous_at < decisions_at);
    }

    #[tokio::test]
    async fn test_restore_without_snapshot_uses_live_state() {
        let f = fixture();
        let session = SessionId::from("s1");
        running_subtask(&f, &session, "migrate users table").await;
        let brief = f.manager.restore(restore_request(&session, None)).await.unwrap();
        assert_eq!(brief.source, RestoreSource::Live);
        assert!(brief.brief.contains("migrate users table"));
        assert!(brief.brief.contains("## Wave State"));
    }

    #[tokio::test]
    async fn test_restore_truncates_and_compacts_atomically() {
        let f = fixture();
        let session = SessionId::from("s1");
        f.capacity
            .track_tokens(TokenUsage {
                agent_id: AgentId::from("agent-1"),
                session_id: session.clone(),
                tool_name: "Read".into(),
                input_size: 400_000,
                output_size: 0,
            })
            .await
            .unwrap();
        running_subtask(&f, &session, &"long description ".repeat(50)).await;

        let brief = f.manager.restore(restore_request(&session, Some(10))).await.unwrap();
        assert!(brief.truncated);
        assert!(brief.brief.ends_with(TRUNCATION_MARKER));
        assert_eq!(brief.brief.chars().count(), 40 + TRUNCATION_MARKER.chars().count());
        assert_eq!(brief.compact_count, 1);
        assert_eq!(brief.usage_after_reset, Some(10_000));

        let status = f.manager.status(&session).await.unwrap();
        assert_eq!(status.compact_count, 1);
        assert!(status.compacted_at.is_some());
    }

    #[tokio::test]
    async fn test_save_stamps_request_metadata() {
        let f = fixture();
        let session = SessionId::from("s1");
        let snapshot = f
            .manager
            .save(&session, SnapshotTrigger::Auto, SnapshotContent::default())
            .await
            .unwrap();
        let request = f.scheduler.current_request(&session).await.unwrap();
        assert_eq!(request.metadata.last_snapshot_trigger.as_deref(), Some("auto"));
        assert_eq!(request.metadata.last_snapshot_at, Some(snapshot.created_at));
        let status = f.manager.status(&session).await.unwrap();
        assert_eq!(status.snapshot_count, 1);
        assert_eq!(status.latest_trigger, Some(SnapshotTrigger::Auto));
    }

    #[tokio::test]
    async fn test_capture_live_collects_active_tasks() {
        let f = fixture();
        let session = SessionId::from("s1");
        let task = running_subtask(&f, &session, "index documents").await;
        let content = f.manager.capture_live(&session).await;
        assert_eq!(content.active_tasks.len(), 1);
        assert_eq!(content.active_tasks[0].subtask_id, Some(task.id));
        assert_eq!(content.wave_state.unwrap().wave_number, 1);
    }
}
