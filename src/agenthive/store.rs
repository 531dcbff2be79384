//! Durable session, message, agent, and cron-job store.
//!
//! Backed by SQLite via `rusqlite`.  All engine tables live under the
//! `hive_` prefix so the store can share a database file with a host
//! application without colliding with its schema.  Messages are append-only
//! with AUTOINCREMENT ids, so ordering within a session is total and strictly
//! increasing; deleting a session cascades to its messages.
//!
//! The store itself takes a short internal lock per call and never suspends
//! while holding it.  Cross-call ordering (e.g. "one turn at a time per
//! session") is the caller's business — see
//! [`SessionProtection`](crate::protection::SessionProtection).

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::agenthive::client::{ChatMessage, Role, ToolCallRequest};
use crate::agenthive::protection::truncate_utf8;

/// Hard cap on persisted message content, bytes.
pub const MAX_CONTENT_BYTES: usize = 100 * 1024;

/// Hard cap on session titles, characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Errors raised by the store.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite failure.
    Sqlite(String),
    /// Attempt to append to an ended session.
    SessionEnded(String),
    /// Session id not present.
    SessionNotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(msg) => write!(f, "store error: {}", msg),
            StoreError::SessionEnded(id) => write!(f, "session {} has ended", id),
            StoreError::SessionNotFound(id) => write!(f, "session {} not found", id),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ended" => SessionStatus::Ended,
            _ => SessionStatus::Active,
        }
    }
}

/// What kind of workload a session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Chat,
    Roundtable,
    Cron,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Chat => "chat",
            SessionType::Roundtable => "roundtable",
            SessionType::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "roundtable" => SessionType::Roundtable,
            "cron" => SessionType::Cron,
            _ => SessionType::Chat,
        }
    }
}

/// A persisted session row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub agent_id: Option<String>,
    pub session_type: SessionType,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// How many history messages a turn loads as context.
    pub context_window: u32,
    pub status: SessionStatus,
    pub message_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub agent_id: Option<String>,
    pub session_type: Option<SessionType>,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub context_window: Option<u32>,
    pub metadata: Option<serde_json::Value>,
}

/// Mutable fields of a session exposed to callers.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<SessionStatus>,
}

/// A persisted message row.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
    pub model: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// View this record as a wire-level chat message.
    pub fn to_chat_message(&self) -> ChatMessage {
        let role = match self.role.as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool {
                call_id: self.tool_call_id.clone().unwrap_or_default(),
            },
            _ => Role::User,
        };
        ChatMessage::new(role, &self.content).with_tool_calls(self.tool_calls.clone())
    }
}

/// Parameters for appending a message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
    pub model: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub metadata: Option<serde_json::Value>,
}

/// Sort key for session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
}

impl SessionSort {
    fn column(&self) -> &'static str {
        match self {
            SessionSort::CreatedAt => "created_at",
            SessionSort::UpdatedAt => "updated_at",
            SessionSort::Title => "title",
        }
    }

    /// Parse a caller-supplied sort key; unknown keys fall back to `created_at`.
    pub fn parse(s: &str) -> Self {
        match s {
            "updated_at" => SessionSort::UpdatedAt,
            "title" => SessionSort::Title,
            _ => SessionSort::CreatedAt,
        }
    }
}

/// Sort direction for session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Parse a caller-supplied order; unknown values fall back to `desc`.
    pub fn parse(s: &str) -> Self {
        match s {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Filters and paging for session listings.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub agent_id: Option<String>,
    pub session_type: Option<SessionType>,
    /// Substring match against title and session id.
    pub search: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub sort: SessionSort,
    pub order: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

/// One page of a session listing.
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<SessionRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_messages: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub sessions_by_type: HashMap<String, u64>,
}

/// Durable mirror of an agent's runtime state.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub id: String,
    pub display_name: String,
    pub focus: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub status: String,
    pub consecutive_failures: u32,
    pub total_errors: u64,
    pub pheromone: f64,
    pub last_active: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// Message roll-up for one agent's sessions.
#[derive(Debug, Clone, Default)]
pub struct AgentMessageStats {
    pub messages: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
}

/// A persisted cron job row.
#[derive(Debug, Clone)]
pub struct CronJobRecord {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub agent_id: Option<String>,
    pub enabled: bool,
    pub payload_kind: String,
    pub payload: String,
    pub session_mode: String,
    pub max_duration_s: u64,
    pub retry_count: u32,
    pub run_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One execution record of a cron job.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_id: String,
    pub status: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_ts(&s))
}

/// Normalise a `DATABASE_URL` into the path rusqlite opens.
fn database_path(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if trimmed.is_empty() {
        ":memory:".to_string()
    } else {
        trimmed.to_string()
    }
}

/// SQLite-backed store for sessions, messages, agents, and cron jobs.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (and migrate) a store at the given `DATABASE_URL`.
    ///
    /// Accepts a plain path, a `sqlite:`/`sqlite://` URL, or `:memory:`.
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(database_path(database_url))?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS hive_sessions (
                id TEXT PRIMARY KEY,
                agent_id TEXT,
                session_type TEXT NOT NULL DEFAULT 'chat',
                title TEXT,
                system_prompt TEXT,
                model TEXT,
                temperature REAL,
                max_output_tokens INTEGER,
                context_window INTEGER NOT NULL DEFAULT 50,
                status TEXT NOT NULL DEFAULT 'active',
                message_count INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                total_cost REAL NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS hive_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES hive_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                thinking TEXT,
                tool_calls TEXT,
                tool_call_id TEXT,
                model TEXT,
                tokens_in INTEGER NOT NULL DEFAULT 0,
                tokens_out INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hive_messages_session
                ON hive_messages(session_id, id);

            CREATE TABLE IF NOT EXISTS hive_agents (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                focus TEXT,
                model TEXT,
                temperature REAL,
                system_prompt TEXT,
                status TEXT NOT NULL DEFAULT 'idle',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                total_errors INTEGER NOT NULL DEFAULT 0,
                pheromone REAL NOT NULL DEFAULT 0.5,
                last_active TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS hive_cron_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                schedule TEXT NOT NULL,
                agent_id TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                payload_kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                session_mode TEXT NOT NULL DEFAULT 'isolated',
                max_duration_s INTEGER NOT NULL DEFAULT 300,
                retry_count INTEGER NOT NULL DEFAULT 0,
                run_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                fail_count INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                last_status TEXT,
                last_duration_ms INTEGER,
                last_error TEXT,
                next_run_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hive_cron_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES hive_cron_jobs(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and ephemeral deployments.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock poisoned")
    }

    // -- sessions ----------------------------------------------------------

    /// Create a session and return its row.
    pub fn create_session(&self, new: NewSession) -> Result<SessionRecord, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let title = new
            .title
            .map(|t| t.chars().take(MAX_TITLE_CHARS).collect::<String>());
        let session_type = new.session_type.unwrap_or(SessionType::Chat);
        let metadata = new.metadata.unwrap_or_else(|| serde_json::json!({}));

        self.lock().execute(
            "INSERT INTO hive_sessions
                (id, agent_id, session_type, title, system_prompt, model, temperature,
                 max_output_tokens, context_window, status, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', ?10, ?11, ?11)",
            params![
                id,
                new.agent_id,
                session_type.as_str(),
                title,
                new.system_prompt,
                new.model,
                new.temperature,
                new.max_output_tokens,
                new.context_window.unwrap_or(50),
                metadata.to_string(),
                fmt_ts(&now),
            ],
        )?;

        self.get_session(&id)?
            .ok_or_else(|| StoreError::SessionNotFound(id))
    }

    /// Fetch one session.
    pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, session_type, title, system_prompt, model, temperature,
                    max_output_tokens, context_window, status, message_count, total_tokens,
                    total_cost, metadata, created_at, updated_at, ended_at
             FROM hive_sessions WHERE id = ?1",
        )?;
        let record = stmt
            .query_row(params![id], |row| Ok(Self::session_from_row(row)))
            .optional()?;
        Ok(record)
    }

    fn session_from_row(row: &rusqlite::Row<'_>) -> SessionRecord {
        SessionRecord {
            id: row.get_unwrap(0),
            agent_id: row.get_unwrap(1),
            session_type: SessionType::parse(&row.get_unwrap::<_, String>(2)),
            title: row.get_unwrap(3),
            system_prompt: row.get_unwrap(4),
            model: row.get_unwrap(5),
            temperature: row.get_unwrap(6),
            max_output_tokens: row.get_unwrap(7),
            context_window: row.get_unwrap(8),
            status: SessionStatus::parse(&row.get_unwrap::<_, String>(9)),
            message_count: row.get_unwrap::<_, i64>(10) as u64,
            total_tokens: row.get_unwrap::<_, i64>(11) as u64,
            total_cost: row.get_unwrap(12),
            metadata: serde_json::from_str(&row.get_unwrap::<_, String>(13))
                .unwrap_or_else(|_| serde_json::json!({})),
            created_at: parse_ts(&row.get_unwrap::<_, String>(14)),
            updated_at: parse_ts(&row.get_unwrap::<_, String>(15)),
            ended_at: parse_opt_ts(row.get_unwrap(16)),
        }
    }

    /// Update title/metadata/status.  Returns false when the session is absent.
    pub fn update_session(&self, id: &str, update: SessionUpdate) -> Result<bool, StoreError> {
        let now = fmt_ts(&Utc::now());
        let conn = self.lock();

        let mut changed = false;
        if let Some(title) = update.title {
            let title: String = title.chars().take(MAX_TITLE_CHARS).collect();
            changed |= conn.execute(
                "UPDATE hive_sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now, id],
            )? > 0;
        }
        if let Some(metadata) = update.metadata {
            changed |= conn.execute(
                "UPDATE hive_sessions SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![metadata.to_string(), now, id],
            )? > 0;
        }
        if let Some(status) = update.status {
            let ended_at = match status {
                SessionStatus::Ended => Some(now.clone()),
                SessionStatus::Active => None,
            };
            changed |= conn.execute(
                "UPDATE hive_sessions SET status = ?1, ended_at = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), ended_at, now, id],
            )? > 0;
        }
        Ok(changed)
    }

    /// Mark a session ended.  Returns false when absent.
    pub fn end_session(&self, id: &str) -> Result<bool, StoreError> {
        let now = fmt_ts(&Utc::now());
        let updated = self.lock().execute(
            "UPDATE hive_sessions SET status = 'ended', ended_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status != 'ended'",
            params![now, id],
        )?;
        Ok(updated > 0)
    }

    /// Delete a session and, by cascade, its messages.
    pub fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = self
            .lock()
            .execute("DELETE FROM hive_sessions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// List sessions with filters and paging.  `limit` is clamped to
    /// `[1, 100]`.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<SessionPage, StoreError> {
        let limit = filter.limit.clamp(1, 100);
        let offset = filter.offset;

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(agent_id) = &filter.agent_id {
            args.push(agent_id.clone());
            clauses.push(format!("agent_id = ?{}", args.len()));
        }
        if let Some(session_type) = filter.session_type {
            args.push(session_type.as_str().to_string());
            clauses.push(format!("session_type = ?{}", args.len()));
        }
        if let Some(search) = &filter.search {
            args.push(format!("%{}%", search));
            let n = args.len();
            clauses.push(format!("(title LIKE ?{n} OR id LIKE ?{n})"));
        }
        if let Some(date_from) = &filter.date_from {
            args.push(fmt_ts(date_from));
            clauses.push(format!("created_at >= ?{}", args.len()));
        }
        if let Some(date_to) = &filter.date_to {
            args.push(fmt_ts(date_to));
            clauses.push(format!("created_at <= ?{}", args.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM hive_sessions{}", where_sql),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT id, agent_id, session_type, title, system_prompt, model, temperature,
                    max_output_tokens, context_window, status, message_count, total_tokens,
                    total_cost, metadata, created_at, updated_at, ended_at
             FROM hive_sessions{} ORDER BY {} {} LIMIT {} OFFSET {}",
            where_sql,
            filter.sort.column(),
            filter.order.keyword(),
            limit,
            offset,
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions: Vec<SessionRecord> = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(Self::session_from_row(row))
            })?
            .collect::<Result<_, _>>()?;

        let has_more = (offset as u64 + sessions.len() as u64) < total as u64;
        Ok(SessionPage {
            sessions,
            total: total as u64,
            limit,
            offset,
            has_more,
        })
    }

    /// Sessions older than `inactive_days` (by `updated_at`) that are
    /// candidates for pruning.  With `dry_run` the candidates are only
    /// reported; otherwise they are deleted (messages cascade).
    pub fn prune_old_sessions(
        &self,
        inactive_days: i64,
        dry_run: bool,
    ) -> Result<Vec<String>, StoreError> {
        let cutoff = fmt_ts(&(Utc::now() - ChronoDuration::days(inactive_days)));
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id FROM hive_sessions WHERE updated_at < ?1")?;
        let ids: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        if !dry_run {
            for id in &ids {
                conn.execute("DELETE FROM hive_sessions WHERE id = ?1", params![id])?;
            }
        }
        Ok(ids)
    }

    // -- messages ----------------------------------------------------------

    /// Append a message and bump the owning session's counters.
    ///
    /// Content larger than [`MAX_CONTENT_BYTES`] is truncated on a character
    /// boundary.  Appending to an ended session is an error.
    pub fn append_message(&self, new: NewMessage) -> Result<MessageRecord, StoreError> {
        let now = Utc::now();
        let content = truncate_utf8(&new.content, MAX_CONTENT_BYTES);
        let tool_calls_json = if new.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&new.tool_calls).map_err(|e| StoreError::Sqlite(e.to_string()))?)
        };
        let metadata = new.metadata.unwrap_or_else(|| serde_json::json!({}));

        let conn = self.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM hive_sessions WHERE id = ?1",
                params![new.session_id],
                |row| row.get(0),
            )
            .optional()?;
        match status.as_deref() {
            None => return Err(StoreError::SessionNotFound(new.session_id)),
            Some("ended") => return Err(StoreError::SessionEnded(new.session_id)),
            Some(_) => {}
        }

        conn.execute(
            "INSERT INTO hive_messages
                (session_id, role, content, thinking, tool_calls, tool_call_id, model,
                 tokens_in, tokens_out, cost, latency_ms, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                new.session_id,
                new.role,
                content,
                new.thinking,
                tool_calls_json,
                new.tool_call_id,
                new.model,
                new.tokens_in as i64,
                new.tokens_out as i64,
                new.cost,
                new.latency_ms as i64,
                metadata.to_string(),
                fmt_ts(&now),
            ],
        )?;
        let message_id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE hive_sessions
             SET message_count = message_count + 1,
                 total_tokens = total_tokens + ?1,
                 total_cost = total_cost + ?2,
                 updated_at = ?3
             WHERE id = ?4",
            params![
                (new.tokens_in + new.tokens_out) as i64,
                new.cost,
                fmt_ts(&now),
                new.session_id,
            ],
        )?;

        drop(conn);
        self.get_message(message_id)?
            .ok_or_else(|| StoreError::Sqlite("message vanished after insert".into()))
    }

    fn message_from_row(row: &rusqlite::Row<'_>) -> MessageRecord {
        let tool_calls: Option<String> = row.get_unwrap(5);
        MessageRecord {
            id: row.get_unwrap(0),
            session_id: row.get_unwrap(1),
            role: row.get_unwrap(2),
            content: row.get_unwrap(3),
            thinking: row.get_unwrap(4),
            tool_calls: tool_calls
                .and_then(|json| serde_json::from_str(&json).ok())
                .unwrap_or_default(),
            tool_call_id: row.get_unwrap(6),
            model: row.get_unwrap(7),
            tokens_in: row.get_unwrap::<_, i64>(8) as u64,
            tokens_out: row.get_unwrap::<_, i64>(9) as u64,
            cost: row.get_unwrap(10),
            latency_ms: row.get_unwrap::<_, i64>(11) as u64,
            metadata: serde_json::from_str(&row.get_unwrap::<_, String>(12))
                .unwrap_or_else(|_| serde_json::json!({})),
            created_at: parse_ts(&row.get_unwrap::<_, String>(13)),
        }
    }

    const MESSAGE_COLUMNS: &'static str =
        "id, session_id, role, content, thinking, tool_calls, tool_call_id, model,
         tokens_in, tokens_out, cost, latency_ms, metadata, created_at";

    /// Fetch one message by id.
    pub fn get_message(&self, id: i64) -> Result<Option<MessageRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hive_messages WHERE id = ?1",
            Self::MESSAGE_COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![id], |row| Ok(Self::message_from_row(row)))
            .optional()?)
    }

    /// Messages of a session in chronological order, paged, optionally
    /// restricted to those created at or after `since`.
    pub fn list_messages(
        &self,
        session_id: &str,
        limit: u32,
        offset: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let limit = limit.clamp(1, 1000);
        let conn = self.lock();
        let (sql, args): (String, Vec<String>) = match since {
            Some(since) => (
                format!(
                    "SELECT {} FROM hive_messages
                     WHERE session_id = ?1 AND created_at >= ?2
                     ORDER BY id ASC LIMIT {} OFFSET {}",
                    Self::MESSAGE_COLUMNS,
                    limit,
                    offset
                ),
                vec![session_id.to_string(), fmt_ts(&since)],
            ),
            None => (
                format!(
                    "SELECT {} FROM hive_messages
                     WHERE session_id = ?1
                     ORDER BY id ASC LIMIT {} OFFSET {}",
                    Self::MESSAGE_COLUMNS,
                    limit,
                    offset
                ),
                vec![session_id.to_string()],
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(Self::message_from_row(row))
            })?
            .collect::<Result<_, _>>()?;
        Ok(messages)
    }

    /// The last `n` messages of a session, in chronological order.
    pub fn recent_messages(
        &self,
        session_id: &str,
        n: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM (
                 SELECT {} FROM hive_messages WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
            Self::MESSAGE_COLUMNS,
            Self::MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![session_id, n], |row| {
                Ok(Self::message_from_row(row))
            })?
            .collect::<Result<_, _>>()?;
        Ok(messages)
    }

    /// Aggregate counts across all sessions.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock();
        let (total_sessions, active_sessions, total_tokens, total_cost): (i64, i64, i64, f64) =
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'active'), 0),
                        COALESCE(SUM(total_tokens), 0),
                        COALESCE(SUM(total_cost), 0)
                 FROM hive_sessions",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )?;
        let total_messages: i64 =
            conn.query_row("SELECT COUNT(*) FROM hive_messages", [], |row| row.get(0))?;

        let mut sessions_by_type = HashMap::new();
        let mut stmt =
            conn.prepare("SELECT session_type, COUNT(*) FROM hive_sessions GROUP BY session_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (session_type, count) = row?;
            sessions_by_type.insert(session_type, count as u64);
        }

        Ok(StoreStats {
            total_sessions: total_sessions as u64,
            active_sessions: active_sessions as u64,
            total_messages: total_messages as u64,
            total_tokens: total_tokens as u64,
            total_cost,
            sessions_by_type,
        })
    }

    // -- agents ------------------------------------------------------------

    /// Insert or update the durable mirror of an agent.
    pub fn upsert_agent(&self, agent: &AgentSnapshot) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT INTO hive_agents
                (id, display_name, focus, model, temperature, system_prompt, status,
                 consecutive_failures, total_errors, pheromone, last_active, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                focus = excluded.focus,
                model = excluded.model,
                temperature = excluded.temperature,
                system_prompt = excluded.system_prompt,
                status = excluded.status,
                consecutive_failures = excluded.consecutive_failures,
                total_errors = excluded.total_errors,
                pheromone = excluded.pheromone,
                last_active = excluded.last_active,
                metadata = excluded.metadata",
            params![
                agent.id,
                agent.display_name,
                agent.focus,
                agent.model,
                agent.temperature,
                agent.system_prompt,
                agent.status,
                agent.consecutive_failures,
                agent.total_errors as i64,
                agent.pheromone,
                agent.last_active.as_ref().map(fmt_ts),
                agent.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Load every persisted agent.
    pub fn load_agents(&self) -> Result<Vec<AgentSnapshot>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, focus, model, temperature, system_prompt, status,
                    consecutive_failures, total_errors, pheromone, last_active, metadata
             FROM hive_agents ORDER BY id",
        )?;
        let agents = stmt
            .query_map([], |row| {
                Ok(AgentSnapshot {
                    id: row.get_unwrap(0),
                    display_name: row.get_unwrap(1),
                    focus: row.get_unwrap(2),
                    model: row.get_unwrap(3),
                    temperature: row.get_unwrap(4),
                    system_prompt: row.get_unwrap(5),
                    status: row.get_unwrap(6),
                    consecutive_failures: row.get_unwrap(7),
                    total_errors: row.get_unwrap::<_, i64>(8) as u64,
                    pheromone: row.get_unwrap(9),
                    last_active: parse_opt_ts(row.get_unwrap(10)),
                    metadata: serde_json::from_str(&row.get_unwrap::<_, String>(11))
                        .unwrap_or_else(|_| serde_json::json!({})),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(agents)
    }

    /// Persist a recomputed pheromone score.
    pub fn set_agent_pheromone(&self, agent_id: &str, score: f64) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE hive_agents SET pheromone = ?1 WHERE id = ?2",
            params![score.clamp(0.0, 1.0), agent_id],
        )?;
        Ok(())
    }

    /// Roll up assistant-message counters for an agent's sessions.
    pub fn agent_message_stats(&self, agent_id: &str) -> Result<AgentMessageStats, StoreError> {
        let conn = self.lock();
        let (messages, total_tokens, avg_latency_ms): (i64, i64, f64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(m.tokens_in + m.tokens_out), 0),
                    COALESCE(AVG(m.latency_ms), 0)
             FROM hive_messages m
             JOIN hive_sessions s ON s.id = m.session_id
             WHERE s.agent_id = ?1 AND m.role = 'assistant'",
            params![agent_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(AgentMessageStats {
            messages: messages as u64,
            total_tokens: total_tokens as u64,
            avg_latency_ms,
        })
    }

    // -- cron jobs ---------------------------------------------------------

    /// Insert a job row.
    pub fn insert_job(&self, job: &CronJobRecord) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT INTO hive_cron_jobs
                (id, name, schedule, agent_id, enabled, payload_kind, payload, session_mode,
                 max_duration_s, retry_count, run_count, success_count, fail_count,
                 last_run_at, last_status, last_duration_ms, last_error, next_run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                job.id,
                job.name,
                job.schedule,
                job.agent_id,
                job.enabled,
                job.payload_kind,
                job.payload,
                job.session_mode,
                job.max_duration_s as i64,
                job.retry_count,
                job.run_count as i64,
                job.success_count as i64,
                job.fail_count as i64,
                job.last_run_at.as_ref().map(fmt_ts),
                job.last_status,
                job.last_duration_ms.map(|v| v as i64),
                job.last_error,
                job.next_run_at.as_ref().map(fmt_ts),
                fmt_ts(&job.created_at),
            ],
        )?;
        Ok(())
    }

    /// Replace the mutable definition fields of a job.
    pub fn update_job(&self, job: &CronJobRecord) -> Result<bool, StoreError> {
        let updated = self.lock().execute(
            "UPDATE hive_cron_jobs SET
                name = ?1, schedule = ?2, agent_id = ?3, enabled = ?4, payload_kind = ?5,
                payload = ?6, session_mode = ?7, max_duration_s = ?8, retry_count = ?9,
                next_run_at = ?10
             WHERE id = ?11",
            params![
                job.name,
                job.schedule,
                job.agent_id,
                job.enabled,
                job.payload_kind,
                job.payload,
                job.session_mode,
                job.max_duration_s as i64,
                job.retry_count,
                job.next_run_at.as_ref().map(fmt_ts),
                job.id,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Delete a job and its history.
    pub fn delete_job(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = self
            .lock()
            .execute("DELETE FROM hive_cron_jobs WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Flip a job's enabled flag.
    pub fn set_job_enabled(&self, id: &str, enabled: bool) -> Result<bool, StoreError> {
        let updated = self.lock().execute(
            "UPDATE hive_cron_jobs SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }

    fn job_from_row(row: &rusqlite::Row<'_>) -> CronJobRecord {
        CronJobRecord {
            id: row.get_unwrap(0),
            name: row.get_unwrap(1),
            schedule: row.get_unwrap(2),
            agent_id: row.get_unwrap(3),
            enabled: row.get_unwrap(4),
            payload_kind: row.get_unwrap(5),
            payload: row.get_unwrap(6),
            session_mode: row.get_unwrap(7),
            max_duration_s: row.get_unwrap::<_, i64>(8) as u64,
            retry_count: row.get_unwrap(9),
            run_count: row.get_unwrap::<_, i64>(10) as u64,
            success_count: row.get_unwrap::<_, i64>(11) as u64,
            fail_count: row.get_unwrap::<_, i64>(12) as u64,
            last_run_at: parse_opt_ts(row.get_unwrap(13)),
            last_status: row.get_unwrap(14),
            last_duration_ms: row.get_unwrap::<_, Option<i64>>(15).map(|v| v as u64),
            last_error: row.get_unwrap(16),
            next_run_at: parse_opt_ts(row.get_unwrap(17)),
            created_at: parse_ts(&row.get_unwrap::<_, String>(18)),
        }
    }

    const JOB_COLUMNS: &'static str =
        "id, name, schedule, agent_id, enabled, payload_kind, payload, session_mode,
         max_duration_s, retry_count, run_count, success_count, fail_count,
         last_run_at, last_status, last_duration_ms, last_error, next_run_at, created_at";

    /// Fetch one job.
    pub fn get_job(&self, id: &str) -> Result<Option<CronJobRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hive_cron_jobs WHERE id = ?1",
            Self::JOB_COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![id], |row| Ok(Self::job_from_row(row)))
            .optional()?)
    }

    /// All jobs, ordered by id.
    pub fn list_jobs(&self) -> Result<Vec<CronJobRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hive_cron_jobs ORDER BY id",
            Self::JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([], |row| Ok(Self::job_from_row(row)))?
            .collect::<Result<_, _>>()?;
        Ok(jobs)
    }

    /// Record one finished execution: append a history row and update the
    /// job's counters and last-run fields.
    pub fn record_execution(
        &self,
        job_id: &str,
        status: &str,
        duration_ms: u64,
        error: Option<&str>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = fmt_ts(&Utc::now());
        let conn = self.lock();
        conn.execute(
            "INSERT INTO hive_cron_history (job_id, status, duration_ms, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, status, duration_ms as i64, error, now],
        )?;
        let success = (status == "success") as i64;
        conn.execute(
            "UPDATE hive_cron_jobs SET
                run_count = run_count + 1,
                success_count = success_count + ?1,
                fail_count = fail_count + ?2,
                last_run_at = ?3,
                last_status = ?4,
                last_duration_ms = ?5,
                last_error = ?6,
                next_run_at = ?7
             WHERE id = ?8",
            params![
                success,
                1 - success,
                now,
                status,
                duration_ms as i64,
                error,
                next_run_at.as_ref().map(fmt_ts),
                job_id,
            ],
        )?;
        Ok(())
    }

    /// Persist a recomputed next-run instant without touching counters.
    pub fn set_job_next_run(
        &self,
        job_id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE hive_cron_jobs SET next_run_at = ?1 WHERE id = ?2",
            params![next_run_at.as_ref().map(fmt_ts), job_id],
        )?;
        Ok(())
    }

    /// Execution history of a job, newest first.  `limit` is clamped to 500.
    pub fn job_history(
        &self,
        job_id: &str,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let limit = limit.clamp(1, 500);
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, status, duration_ms, error, created_at
             FROM hive_cron_history WHERE job_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let history = stmt
            .query_map(params![job_id, limit], |row| {
                Ok(ExecutionRecord {
                    id: row.get_unwrap(0),
                    job_id: row.get_unwrap(1),
                    status: row.get_unwrap(2),
                    duration_ms: row.get_unwrap::<_, i64>(3) as u64,
                    error: row.get_unwrap(4),
                    created_at: parse_ts(&row.get_unwrap::<_, String>(5)),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::in_memory().unwrap()
    }

    fn make_session(store: &SessionStore) -> SessionRecord {
        store
            .create_session(NewSession {
                agent_id: Some("main".into()),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn message_ids_are_strictly_increasing() {
        let store = store();
        let session = make_session(&store);
        let mut last_id = 0;
        for i in 0..5 {
            let record = store
                .append_message(NewMessage {
                    session_id: session.id.clone(),
                    role: "user".into(),
                    content: format!("message {}", i),
                    ..Default::default()
                })
                .unwrap();
            assert!(record.id > last_id);
            last_id = record.id;
        }
        let messages = store.list_messages(&session.id, 100, 0, None).unwrap();
        assert_eq!(messages.len(), 5);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id
            && w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn append_bumps_session_counters() {
        let store = store();
        let session = make_session(&store);
        store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: "assistant".into(),
                content: "hello".into(),
                tokens_in: 10,
                tokens_out: 5,
                cost: 0.001,
                ..Default::default()
            })
            .unwrap();
        let session = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(session.message_count, 1);
        assert_eq!(session.total_tokens, 15);
        assert!(session.total_cost > 0.0);
    }

    #[test]
    fn ended_sessions_reject_messages() {
        let store = store();
        let session = make_session(&store);
        assert!(store.end_session(&session.id).unwrap());
        let err = store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: "user".into(),
                content: "too late".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionEnded(_)));
    }

    #[test]
    fn delete_cascades_to_messages() {
        let store = store();
        let session = make_session(&store);
        let record = store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: "user".into(),
                content: "hi".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.delete_session(&session.id).unwrap());
        assert!(store.get_message(record.id).unwrap().is_none());
    }

    #[test]
    fn oversized_content_is_truncated() {
        let store = store();
        let session = make_session(&store);
        let record = store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: "user".into(),
                content: "x".repeat(MAX_CONTENT_BYTES + 1000),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.content.len(), MAX_CONTENT_BYTES);
    }

    #[test]
    fn listing_clamps_limit_and_reports_paging() {
        let store = store();
        for _ in 0..3 {
            make_session(&store);
        }
        let page = store
            .list_sessions(&SessionFilter {
                limit: 0, // clamped up to 1
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.limit, 1);
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.total, 3);
        assert!(page.has_more);

        let page = store
            .list_sessions(&SessionFilter {
                limit: 500, // clamped down to 100
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.limit, 100);
        assert_eq!(page.sessions.len(), 3);
        assert!(!page.has_more);
    }

    #[test]
    fn filters_compose() {
        let store = store();
        store
            .create_session(NewSession {
                agent_id: Some("a".into()),
                session_type: Some(SessionType::Cron),
                title: Some("nightly digest".into()),
                ..Default::default()
            })
            .unwrap();
        store
            .create_session(NewSession {
                agent_id: Some("b".into()),
                title: Some("support chat".into()),
                ..Default::default()
            })
            .unwrap();

        let page = store
            .list_sessions(&SessionFilter {
                agent_id: Some("a".into()),
                session_type: Some(SessionType::Cron),
                search: Some("digest".into()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.sessions[0].title.as_deref(), Some("nightly digest"));
    }

    #[test]
    fn prune_dry_run_never_mutates() {
        let store = store();
        let session = make_session(&store);
        // Nothing is older than 0 days in the future direction; use -1 to
        // make the cutoff later than now so the session qualifies.
        let candidates = store.prune_old_sessions(-1, true).unwrap();
        assert_eq!(candidates, vec![session.id.clone()]);
        assert!(store.get_session(&session.id).unwrap().is_some());

        let removed = store.prune_old_sessions(-1, false).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.get_session(&session.id).unwrap().is_none());
    }

    #[test]
    fn titles_are_capped() {
        let store = store();
        let session = store
            .create_session(NewSession {
                title: Some("t".repeat(500)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.title.unwrap().chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn job_roundtrip_and_history() {
        let store = store();
        let job = CronJobRecord {
            id: "digest".into(),
            name: "Nightly digest".into(),
            schedule: "0 0 3 * * *".into(),
            agent_id: Some("main".into()),
            enabled: true,
            payload_kind: "prompt".into(),
            payload: "Summarise the day.".into(),
            session_mode: "shared".into(),
            max_duration_s: 120,
            retry_count: 2,
            run_count: 0,
            success_count: 0,
            fail_count: 0,
            last_run_at: None,
            last_status: None,
            last_duration_ms: None,
            last_error: None,
            next_run_at: None,
            created_at: Utc::now(),
        };
        store.insert_job(&job).unwrap();

        store
            .record_execution("digest", "success", 1500, None, None)
            .unwrap();
        store
            .record_execution("digest", "timeout", 120_000, Some("wall clock"), None)
            .unwrap();

        let loaded = store.get_job("digest").unwrap().unwrap();
        assert_eq!(loaded.run_count, 2);
        assert_eq!(loaded.success_count, 1);
        assert_eq!(loaded.fail_count, 1);
        assert_eq!(loaded.last_status.as_deref(), Some("timeout"));

        let history = store.job_history("digest", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, "timeout"); // newest first
    }

    #[test]
    fn agent_snapshot_roundtrip() {
        let store = store();
        let agent = AgentSnapshot {
            id: "devops".into(),
            display_name: "DevOps".into(),
            focus: Some("devops".into()),
            model: Some("fast".into()),
            temperature: Some(0.2),
            system_prompt: None,
            status: "idle".into(),
            consecutive_failures: 0,
            total_errors: 0,
            pheromone: 0.5,
            last_active: None,
            metadata: serde_json::json!({}),
        };
        store.upsert_agent(&agent).unwrap();
        store.set_agent_pheromone("devops", 0.75).unwrap();

        let agents = store.load_agents().unwrap();
        assert_eq!(agents.len(), 1);
        assert!((agents[0].pheromone - 0.75).abs() < 1e-9);
    }
}
