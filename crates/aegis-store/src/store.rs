//! The session store.
//!
//! Sessions live in memory fronted by per-session append-only JSONL shard
//! files (`sessions/<id>.log`): the first line records the session itself,
//! every following line one interaction.  A session survives process
//! restart within retention; the shard is the source of truth on reload.
//!
//! Writers are serialised per session behind an async mutex; readers get a
//! consistent snapshot per call.  No interaction is ever rewritten.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use aegis_registry::Role;

use crate::error::{Result, StoreError};
use crate::session::{
    HistoryKind, Interaction, Session, SessionAnalytics, SessionStatus, WorkMode,
};

/// Retention and capacity tunables, mirrored from the `[session]` config
/// section.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Idle time after which a session is destroyed.
    pub ttl_seconds: i64,
    /// Conversation entries retained in memory per session.
    pub conv_cap: usize,
    /// Command entries retained in memory per session.
    pub cmd_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60,
            conv_cap: 100,
            cmd_cap: 200,
        }
    }
}

/// One line of a session shard.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ShardRecord {
    Session { session: Session },
    Interaction { interaction: Interaction },
}

/// In-memory state for one session.
struct SessionState {
    session: Session,
    conversation: VecDeque<Interaction>,
    commands: VecDeque<Interaction>,
}

impl SessionState {
    fn new(session: Session) -> Self {
        Self {
            session,
            conversation: VecDeque::new(),
            commands: VecDeque::new(),
        }
    }
}

/// Append-only session store with bounded in-memory views.
pub struct SessionStore {
    root: PathBuf,
    config: StoreConfig,
    sessions: DashMap<Uuid, Arc<Mutex<SessionState>>>,
}

impl SessionStore {
    /// Open the store, rebuilding sessions from shards under `root`.
    ///
    /// Expired shards are removed during the scan.
    pub async fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let store = Self {
            root: root.clone(),
            config,
            sessions: DashMap::new(),
        };

        let mut dir = tokio::fs::read_dir(&root).await?;
        let mut restored = 0usize;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            match store.load_shard(&path).await {
                Ok(Some(state)) => {
                    restored += 1;
                    store
                        .sessions
                        .insert(state.session.id, Arc::new(Mutex::new(state)));
                }
                Ok(None) => {
                    tracing::debug!(path = %path.display(), "removing expired session shard");
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable shard");
                }
            }
        }

        tracing::info!(restored, root = %root.display(), "session store opened");
        Ok(store)
    }

    /// Create a new session and persist its header record.
    pub async fn create(&self, role: Role, mode: WorkMode) -> Result<Session> {
        let session = Session::new(role, mode);
        let record = ShardRecord::Session {
            session: session.clone(),
        };
        self.append_record(session.id, &record).await?;

        self.sessions.insert(
            session.id,
            Arc::new(Mutex::new(SessionState::new(session.clone()))),
        );

        tracing::info!(session_id = %session.id, role = %session.role, mode = %session.mode, "session created");
        Ok(session)
    }

    /// Fetch a session snapshot.
    pub async fn get(&self, id: Uuid) -> Result<Session> {
        let state = self.state(id)?;
        let guard = state.lock().await;
        Ok(guard.session.clone())
    }

    /// All live sessions, unordered.
    pub async fn sessions(&self) -> Vec<Session> {
        let mut out = Vec::with_capacity(self.sessions.len());
        for entry in self.sessions.iter() {
            out.push(entry.value().lock().await.session.clone());
        }
        out
    }

    /// Refresh a session's last-activity timestamp.
    pub async fn touch(&self, id: Uuid) -> Result<()> {
        let state = self.state(id)?;
        let mut guard = state.lock().await;
        guard.session.last_activity = Utc::now();
        Ok(())
    }

    /// Append an interaction atomically.
    ///
    /// The in-memory views are capped (oldest evicted first); the on-disk
    /// shard keeps the full history until the session is destroyed.
    pub async fn append(&self, id: Uuid, interaction: Interaction) -> Result<()> {
        let state = self.state(id)?;
        let mut guard = state.lock().await;

        let record = ShardRecord::Interaction {
            interaction: interaction.clone(),
        };
        self.append_record(id, &record).await?;

        guard.session.last_activity = interaction.timestamp;

        if interaction.is_command() {
            guard.commands.push_back(interaction.clone());
            while guard.commands.len() > self.config.cmd_cap {
                guard.commands.pop_front();
            }
        }
        guard.conversation.push_back(interaction);
        while guard.conversation.len() > self.config.conv_cap {
            guard.conversation.pop_front();
        }

        Ok(())
    }

    /// Read a history view, newest first, optionally limited.
    pub async fn history(
        &self,
        id: Uuid,
        kind: HistoryKind,
        limit: Option<usize>,
    ) -> Result<Vec<Interaction>> {
        let state = self.state(id)?;
        let guard = state.lock().await;

        let view = match kind {
            HistoryKind::Conversation => &guard.conversation,
            HistoryKind::Commands => &guard.commands,
        };

        let take = limit.unwrap_or(view.len());
        Ok(view.iter().rev().take(take).cloned().collect())
    }

    /// Derived metrics over the live command and conversation entries.
    pub async fn analytics(&self, id: Uuid) -> Result<SessionAnalytics> {
        let state = self.state(id)?;
        let guard = state.lock().await;

        let mut tool_usage = std::collections::HashMap::new();
        let mut successes = 0u64;
        let mut total_duration = 0u64;
        for cmd in &guard.commands {
            if let Some(tool) = &cmd.tool {
                *tool_usage.entry(tool.clone()).or_insert(0u64) += 1;
            }
            if cmd.success {
                successes += 1;
            }
            total_duration += cmd.duration_ms;
        }

        let mut hourly_histogram = vec![0u64; 24];
        for interaction in &guard.conversation {
            let hour = chrono::Timelike::hour(&interaction.timestamp) as usize;
            hourly_histogram[hour] += 1;
        }

        let command_count = guard.commands.len();
        Ok(SessionAnalytics {
            total_interactions: guard.conversation.len(),
            tool_usage,
            success_rate: if command_count == 0 {
                0.0
            } else {
                successes as f64 / command_count as f64
            },
            avg_duration_ms: if command_count == 0 {
                0.0
            } else {
                total_duration as f64 / command_count as f64
            },
            hourly_histogram,
        })
    }

    /// Status snapshot for the inbound API.
    pub async fn status(&self, id: Uuid) -> Result<SessionStatus> {
        let state = self.state(id)?;
        let guard = state.lock().await;

        let mut tools_used: Vec<String> = Vec::new();
        for cmd in &guard.commands {
            if let Some(tool) = &cmd.tool {
                if !tools_used.contains(tool) {
                    tools_used.push(tool.clone());
                }
            }
        }

        Ok(SessionStatus {
            session_id: guard.session.id,
            command_count: guard.commands.len(),
            tools_used,
            duration_secs: (Utc::now() - guard.session.created_at).num_seconds(),
            last_activity: guard.session.last_activity,
        })
    }

    /// Destroy a session and its shard.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let (_, _state) = self
            .sessions
            .remove(&id)
            .ok_or(StoreError::UnknownSession { id })?;

        let path = self.shard_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Destroy every session idle past the TTL.  Returns how many were
    /// removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let ttl = Duration::seconds(self.config.ttl_seconds);
        let now = Utc::now();

        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            let guard = entry.value().lock().await;
            if now - guard.session.last_activity > ttl {
                expired.push(guard.session.id);
            }
        }

        for id in &expired {
            tracing::info!(session_id = %id, "sweeping expired session");
            let _ = self.delete(*id).await;
        }

        Ok(expired.len())
    }

    // -- Private helpers ----------------------------------------------------

    fn state(&self, id: Uuid) -> Result<Arc<Mutex<SessionState>>> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::UnknownSession { id })
    }

    fn shard_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.log"))
    }

    /// Append one JSON line to the session's shard on the blocking pool.
    async fn append_record(&self, id: Uuid, record: &ShardRecord) -> Result<()> {
        let path = self.shard_path(id);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            Ok(())
        })
        .await?
    }

    /// Rebuild a session from its shard.  Returns `None` when the session
    /// is past retention.
    async fn load_shard(&self, path: &Path) -> Result<Option<SessionState>> {
        let raw = tokio::fs::read_to_string(path).await?;

        let mut state: Option<SessionState> = None;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ShardRecord>(line)? {
                ShardRecord::Session { session } => {
                    state = Some(SessionState::new(session));
                }
                ShardRecord::Interaction { interaction } => {
                    let Some(state) = state.as_mut() else {
                        tracing::warn!(path = %path.display(), "interaction before session header");
                        continue;
                    };
                    state.session.last_activity = interaction.timestamp;
                    if interaction.is_command() {
                        state.commands.push_back(interaction.clone());
                        while state.commands.len() > self.config.cmd_cap {
                            state.commands.pop_front();
                        }
                    }
                    state.conversation.push_back(interaction);
                    while state.conversation.len() > self.config.conv_cap {
                        state.conversation.pop_front();
                    }
                }
            }
        }

        let Some(state) = state else {
            return Ok(None);
        };

        let ttl = Duration::seconds(self.config.ttl_seconds);
        if Utc::now() - state.session.last_activity > ttl {
            return Ok(None);
        }

        Ok(Some(state))
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("root", &self.root)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(root: &Path) -> SessionStore {
        SessionStore::open(root, StoreConfig::default()).await.unwrap()
    }

    fn command_interaction(tool: &str, success: bool, duration_ms: u64) -> Interaction {
        Interaction {
            command: Some(vec![tool.to_string(), "-x".to_string()]),
            tool: Some(tool.to_string()),
            success,
            duration_ms,
            ..Interaction::conversational("do it", "tool_request")
        }
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;

        let session = store.create(Role::Student, WorkMode::Interactive).await.unwrap();
        let fetched = store.get(session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.role, Role::Student);
        assert_eq!(fetched.mode, WorkMode::Interactive);
    }

    #[tokio::test]
    async fn unknown_session_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;

        let result = store.get(Uuid::now_v7()).await;
        assert!(matches!(result, Err(StoreError::UnknownSession { .. })));
    }

    #[tokio::test]
    async fn append_and_history_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let session = store.create(Role::Student, WorkMode::Quick).await.unwrap();

        for i in 0..3 {
            let mut interaction =
                Interaction::conversational(format!("message {i}"), "general_conversation");
            interaction.timestamp = Utc::now() + Duration::milliseconds(i);
            store.append(session.id, interaction).await.unwrap();
        }

        let history = store
            .history(session.id, HistoryKind::Conversation, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].user_input, "message 2");
        assert_eq!(history[2].user_input, "message 0");

        let limited = store
            .history(session.id, HistoryKind::Conversation, Some(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].user_input, "message 2");
    }

    #[tokio::test]
    async fn command_history_filters_conversational() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let session = store.create(Role::PenTester, WorkMode::Quick).await.unwrap();

        store
            .append(
                session.id,
                Interaction::conversational("hi", "general_conversation"),
            )
            .await
            .unwrap();
        store
            .append(session.id, command_interaction("nmap", true, 100))
            .await
            .unwrap();

        let commands = store
            .history(session.id, HistoryKind::Commands, None)
            .await
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].tool.as_deref(), Some("nmap"));
    }

    #[tokio::test]
    async fn caps_evict_oldest_in_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::open(
            tmp.path(),
            StoreConfig {
                conv_cap: 2,
                cmd_cap: 1,
                ..StoreConfig::default()
            },
        )
        .await
        .unwrap();
        let session = store.create(Role::Student, WorkMode::Quick).await.unwrap();

        store
            .append(session.id, command_interaction("nmap", true, 10))
            .await
            .unwrap();
        store
            .append(session.id, command_interaction("gobuster", true, 20))
            .await
            .unwrap();
        store
            .append(
                session.id,
                Interaction::conversational("done?", "general_conversation"),
            )
            .await
            .unwrap();

        let conversation = store
            .history(session.id, HistoryKind::Conversation, None)
            .await
            .unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].user_input, "done?");

        let commands = store
            .history(session.id, HistoryKind::Commands, None)
            .await
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].tool.as_deref(), Some("gobuster"));
    }

    #[tokio::test]
    async fn analytics_derivation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let session = store.create(Role::PenTester, WorkMode::Quick).await.unwrap();

        store
            .append(session.id, command_interaction("nmap", true, 100))
            .await
            .unwrap();
        store
            .append(session.id, command_interaction("nmap", false, 300))
            .await
            .unwrap();
        store
            .append(session.id, command_interaction("gobuster", true, 200))
            .await
            .unwrap();

        let analytics = store.analytics(session.id).await.unwrap();
        assert_eq!(analytics.total_interactions, 3);
        assert_eq!(analytics.tool_usage["nmap"], 2);
        assert_eq!(analytics.tool_usage["gobuster"], 1);
        assert!((analytics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((analytics.avg_duration_ms - 200.0).abs() < 1e-9);
        assert_eq!(analytics.hourly_histogram.iter().sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn sessions_survive_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let session_id = {
            let store = open_store(tmp.path()).await;
            let session = store.create(Role::ForensicExpert, WorkMode::Interactive).await.unwrap();
            store
                .append(session.id, command_interaction("volatility", true, 50))
                .await
                .unwrap();
            session.id
        };

        let reopened = open_store(tmp.path()).await;
        let session = reopened.get(session_id).await.unwrap();
        assert_eq!(session.role, Role::ForensicExpert);

        let commands = reopened
            .history(session_id, HistoryKind::Commands, None)
            .await
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].tool.as_deref(), Some("volatility"));
    }

    #[tokio::test]
    async fn expired_sessions_dropped_on_open() {
        let tmp = tempfile::tempdir().unwrap();
        let session_id = {
            let store = SessionStore::open(
                tmp.path(),
                StoreConfig {
                    ttl_seconds: 0,
                    ..StoreConfig::default()
                },
            )
            .await
            .unwrap();
            let session = store.create(Role::Student, WorkMode::Quick).await.unwrap();
            session.id
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reopened = SessionStore::open(
            tmp.path(),
            StoreConfig {
                ttl_seconds: 0,
                ..StoreConfig::default()
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            reopened.get(session_id).await,
            Err(StoreError::UnknownSession { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_shard() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let session = store.create(Role::Student, WorkMode::Quick).await.unwrap();

        let shard = tmp.path().join(format!("{}.log", session.id));
        assert!(shard.exists());

        store.delete(session.id).await.unwrap();
        assert!(!shard.exists());
        assert!(store.get(session.id).await.is_err());
    }

    #[tokio::test]
    async fn sweep_removes_idle_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::open(
            tmp.path(),
            StoreConfig {
                ttl_seconds: 0,
                ..StoreConfig::default()
            },
        )
        .await
        .unwrap();

        store.create(Role::Student, WorkMode::Quick).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let swept = store.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn interaction_count_never_decreases() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let session = store.create(Role::Student, WorkMode::Quick).await.unwrap();

        let mut last = 0;
        for i in 0..5 {
            store
                .append(
                    session.id,
                    Interaction::conversational(format!("m{i}"), "general_conversation"),
                )
                .await
                .unwrap();
            let count = store.analytics(session.id).await.unwrap().total_interactions;
            assert!(count >= last);
            last = count;
        }
    }
}
