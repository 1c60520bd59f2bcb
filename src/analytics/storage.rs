//! SQLite storage for sessions, messages, events, and aggregates
//!
//! Single embedded database behind a connection mutex. Sessions are upserted
//! (replace by id); messages and events are append-only. Deleting a session
//! cascades to everything it owns.

use super::models::{
    CostGranularity, CostPeriod, Event, EventType, Feedback, IssueCategory, QualityMetrics,
    ResolutionPath, Session, SessionOutcome, SessionSummary, StoredMessage, ToolEvent, ToolStats,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    total_prompt_tokens INTEGER DEFAULT 0,
    total_completion_tokens INTEGER DEFAULT 0,
    outcome TEXT DEFAULT 'in_progress',
    feedback_score INTEGER,
    feedback_comment TEXT,
    issue_category TEXT DEFAULT 'unknown',
    osi_layer_resolved INTEGER,
    message_count INTEGER DEFAULT 0,
    user_message_count INTEGER DEFAULT 0,
    tool_call_count INTEGER DEFAULT 0,
    llm_backend TEXT,
    model_name TEXT,
    had_fallback INTEGER DEFAULT 0,
    estimated_cost_usd REAL DEFAULT 0.0,
    total_llm_time_ms INTEGER DEFAULT 0,
    total_tool_time_ms INTEGER DEFAULT 0,
    preview TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_call_id TEXT,
    tool_name TEXT,
    tool_calls TEXT,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);

CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    duration_ms INTEGER,
    prompt_tokens INTEGER DEFAULT 0,
    completion_tokens INTEGER DEFAULT 0,
    metadata TEXT,
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);

CREATE TABLE IF NOT EXISTS tool_events (
    event_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    execution_time_ms INTEGER DEFAULT 0,
    success INTEGER DEFAULT 1,
    error_message TEXT,
    is_repeated INTEGER DEFAULT 0,
    consecutive_count INTEGER DEFAULT 1,
    arguments TEXT,
    result_summary TEXT,
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);

CREATE TABLE IF NOT EXISTS feedback (
    feedback_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE,
    score INTEGER NOT NULL,
    comment TEXT,
    timestamp TEXT NOT NULL,
    source TEXT DEFAULT 'api',
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);

CREATE TABLE IF NOT EXISTS resolution_paths (
    path_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    tool_sequence TEXT NOT NULL,
    was_successful INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
CREATE INDEX IF NOT EXISTS idx_sessions_outcome ON sessions(outcome);
CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_tool_events_session_id ON tool_events(session_id);
CREATE INDEX IF NOT EXISTS idx_tool_events_tool_name ON tool_events(tool_name);
CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id);
";

/// Thread-safe storage handle
#[derive(Clone)]
pub struct AnalyticsStorage {
    conn: Arc<Mutex<Connection>>,
}

impl AnalyticsStorage {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Session Operations ====================

    /// Save or replace a session
    pub fn save_session(&self, session: &Session) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sessions (
                session_id, started_at, ended_at, total_prompt_tokens,
                total_completion_tokens, outcome, feedback_score, feedback_comment,
                issue_category, osi_layer_resolved, message_count, user_message_count,
                tool_call_count, llm_backend, model_name, had_fallback,
                estimated_cost_usd, total_llm_time_ms, total_tool_time_ms, preview
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                session.session_id,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.total_prompt_tokens,
                session.total_completion_tokens,
                session.outcome.as_str(),
                session.feedback_score,
                session.feedback_comment,
                session.issue_category.as_str(),
                session.osi_layer_resolved,
                session.message_count,
                session.user_message_count,
                session.tool_call_count,
                session.llm_backend,
                session.model_name,
                i64::from(session.had_fallback),
                session.estimated_cost_usd,
                session.total_llm_time_ms,
                session.total_tool_time_ms,
                session.preview,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> StorageResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE session_id = ?1")?;
        let mut rows = stmt.query(params![session_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    /// List sessions with optional filters, newest first
    pub fn get_sessions(
        &self,
        outcome: Option<SessionOutcome>,
        category: Option<IssueCategory>,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<Session>> {
        let mut query = "SELECT * FROM sessions WHERE 1=1".to_string();
        let mut bindings: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(outcome) = outcome {
            query.push_str(" AND outcome = ?");
            bindings.push(outcome.as_str().to_string().into());
        }
        if let Some(category) = category {
            query.push_str(" AND issue_category = ?");
            bindings.push(category.as_str().to_string().into());
        }
        query.push_str(" ORDER BY started_at DESC LIMIT ? OFFSET ?");
        bindings.push(limit.into());
        bindings.push(offset.into());

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
            row_to_session(row)
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    pub fn count_sessions(&self) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .map_err(StorageError::from)
    }

    pub fn update_session_preview(&self, session_id: &str, preview: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE sessions SET preview = ?1 WHERE session_id = ?2",
            params![preview, session_id],
        )?;
        Ok(updated > 0)
    }

    pub fn update_session_outcome(
        &self,
        session_id: &str,
        outcome: SessionOutcome,
    ) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE sessions SET outcome = ?1 WHERE session_id = ?2",
            params![outcome.as_str(), session_id],
        )?;
        Ok(updated > 0)
    }

    /// Delete a session and all rows that belong to it
    pub fn delete_session(&self, session_id: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        conn.execute("DELETE FROM events WHERE session_id = ?1", params![session_id])?;
        conn.execute("DELETE FROM tool_events WHERE session_id = ?1", params![session_id])?;
        conn.execute("DELETE FROM feedback WHERE session_id = ?1", params![session_id])?;
        conn.execute(
            "DELETE FROM resolution_paths WHERE session_id = ?1",
            params![session_id],
        )?;
        let deleted = conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        Ok(deleted > 0)
    }

    // ==================== Message Operations ====================

    /// Append a message; the per-session sequence id is assigned here
    pub fn save_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        tool_call_id: Option<&str>,
        tool_name: Option<&str>,
        tool_calls: Option<&Value>,
    ) -> StorageResult<StoredMessage> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let message_id = uuid::Uuid::new_v4().to_string();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages (message_id, session_id, sequence_id, role, content, tool_call_id, tool_name, tool_calls, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message_id,
                session_id,
                sequence_id,
                role,
                content,
                tool_call_id,
                tool_name,
                tool_calls.map(std::string::ToString::to_string),
                now.to_rfc3339(),
            ],
        )?;

        Ok(StoredMessage {
            message_id,
            session_id: session_id.to_string(),
            sequence_id,
            role: role.to_string(),
            content: content.to_string(),
            tool_call_id: tool_call_id.map(str::to_string),
            tool_name: tool_name.map(str::to_string),
            tool_calls: tool_calls.cloned(),
            timestamp: now,
        })
    }

    pub fn get_messages(&self, session_id: &str) -> StorageResult<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT message_id, session_id, sequence_id, role, content, tool_call_id, tool_name, tool_calls, timestamp
             FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(StoredMessage {
                message_id: row.get(0)?,
                session_id: row.get(1)?,
                sequence_id: row.get(2)?,
                role: row.get(3)?,
                content: row.get(4)?,
                tool_call_id: row.get(5)?,
                tool_name: row.get(6)?,
                tool_calls: row
                    .get::<_, Option<String>>(7)?
                    .and_then(|s| serde_json::from_str(&s).ok()),
                timestamp: parse_datetime(&row.get::<_, String>(8)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    // ==================== Event Operations ====================

    pub fn save_event(&self, event: &Event) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO events (
                event_id, session_id, event_type, timestamp,
                duration_ms, prompt_tokens, completion_tokens, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.event_id,
                event.session_id,
                event.event_type.as_str(),
                event.timestamp.to_rfc3339(),
                event.duration_ms,
                event.prompt_tokens,
                event.completion_tokens,
                Value::Object(event.metadata.clone()).to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn get_events(&self, session_id: &str) -> StorageResult<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT event_id, session_id, event_type, timestamp, duration_ms, prompt_tokens, completion_tokens, metadata
             FROM events WHERE session_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(Event {
                event_id: row.get(0)?,
                session_id: row.get(1)?,
                event_type: EventType::parse(&row.get::<_, String>(2)?)
                    .unwrap_or(EventType::Error),
                timestamp: parse_datetime(&row.get::<_, String>(3)?),
                duration_ms: row.get(4)?,
                prompt_tokens: row.get(5)?,
                completion_tokens: row.get(6)?,
                metadata: row
                    .get::<_, Option<String>>(7)?
                    .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
                    .unwrap_or_default(),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    // ==================== Tool Event Operations ====================

    pub fn save_tool_event(&self, tool_event: &ToolEvent) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tool_events (
                event_id, session_id, timestamp, tool_name,
                execution_time_ms, success, error_message,
                is_repeated, consecutive_count, arguments, result_summary
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                tool_event.event_id,
                tool_event.session_id,
                tool_event.timestamp.to_rfc3339(),
                tool_event.tool_name,
                tool_event.execution_time_ms,
                i64::from(tool_event.success),
                tool_event.error_message,
                i64::from(tool_event.is_repeated),
                tool_event.consecutive_count,
                Value::Object(tool_event.arguments.clone()).to_string(),
                tool_event.result_summary,
            ],
        )?;
        Ok(())
    }

    pub fn get_tool_events(&self, session_id: &str) -> StorageResult<Vec<ToolEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT event_id, session_id, timestamp, tool_name, execution_time_ms, success,
                    error_message, is_repeated, consecutive_count, arguments, result_summary
             FROM tool_events WHERE session_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(ToolEvent {
                event_id: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: parse_datetime(&row.get::<_, String>(2)?),
                tool_name: row.get(3)?,
                execution_time_ms: row.get(4)?,
                success: row.get::<_, i64>(5)? != 0,
                error_message: row.get(6)?,
                is_repeated: row.get::<_, i64>(7)? != 0,
                consecutive_count: row.get(8)?,
                arguments: row
                    .get::<_, Option<String>>(9)?
                    .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
                    .unwrap_or_default(),
                result_summary: row.get(10)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    // ==================== Feedback Operations ====================

    /// Save feedback, replacing any prior feedback for the session
    pub fn save_feedback(&self, feedback: &Feedback) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM feedback WHERE session_id = ?1",
            params![feedback.session_id],
        )?;
        conn.execute(
            "INSERT INTO feedback (feedback_id, session_id, score, comment, timestamp, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                feedback.feedback_id,
                feedback.session_id,
                feedback.score,
                feedback.comment,
                feedback.timestamp.to_rfc3339(),
                feedback.source,
            ],
        )?;
        Ok(())
    }

    pub fn get_feedback(&self, session_id: &str) -> StorageResult<Option<Feedback>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT feedback_id, session_id, score, comment, timestamp, source FROM feedback WHERE session_id = ?1")?;
        let mut rows = stmt.query(params![session_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Feedback {
                feedback_id: row.get(0)?,
                session_id: row.get(1)?,
                score: row.get(2)?,
                comment: row.get(3)?,
                timestamp: parse_datetime(&row.get::<_, String>(4)?),
                source: row.get(5)?,
            })),
            None => Ok(None),
        }
    }

    // ==================== Resolution Path Operations ====================

    pub fn save_resolution_path(&self, path: &ResolutionPath) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO resolution_paths (path_id, session_id, tool_sequence, was_successful, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                path.path_id,
                path.session_id,
                serde_json::to_string(&path.tool_sequence).unwrap_or_else(|_| "[]".to_string()),
                i64::from(path.was_successful),
                path.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ==================== Aggregation ====================

    /// Aggregated session statistics, optionally bounded by start time
    pub fn get_session_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StorageResult<SessionSummary> {
        let (date_filter, bindings) = date_filter(start, end);
        let conn = self.conn.lock().unwrap();

        let query = format!(
            "SELECT
                COUNT(*) as total,
                SUM(CASE WHEN outcome = 'resolved' THEN 1 ELSE 0 END) as resolved,
                SUM(CASE WHEN outcome = 'unresolved' THEN 1 ELSE 0 END) as unresolved,
                SUM(CASE WHEN outcome = 'abandoned' THEN 1 ELSE 0 END) as abandoned,
                SUM(CASE WHEN outcome = 'in_progress' THEN 1 ELSE 0 END) as in_progress,
                AVG(total_prompt_tokens + total_completion_tokens) as avg_tokens,
                AVG(message_count) as avg_messages,
                SUM(estimated_cost_usd) as total_cost,
                SUM(had_fallback) as fallback_count
             FROM sessions WHERE 1=1 {date_filter}"
        );

        let mut summary = {
            let mut stmt = conn.prepare(&query)?;
            stmt.query_row(rusqlite::params_from_iter(bindings.iter()), |row| {
                Ok(SessionSummary {
                    total_sessions: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    resolved_count: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    unresolved_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    abandoned_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    in_progress_count: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    avg_tokens_per_session: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                    avg_time_to_resolution_seconds: 0.0,
                    avg_messages_per_session: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                    total_cost_usd: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                    backend_counts: Map::new(),
                    fallback_count: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
                })
            })?
        };

        // Time-to-resolution is averaged over resolved sessions only
        let ttr_query = format!(
            "SELECT AVG((julianday(ended_at) - julianday(started_at)) * 86400)
             FROM sessions
             WHERE outcome = 'resolved' AND ended_at IS NOT NULL {date_filter}"
        );
        let avg_ttr: Option<f64> = {
            let mut stmt = conn.prepare(&ttr_query)?;
            stmt.query_row(rusqlite::params_from_iter(bindings.iter()), |row| row.get(0))?
        };
        summary.avg_time_to_resolution_seconds = avg_ttr.unwrap_or(0.0);

        let backend_query = format!(
            "SELECT llm_backend, COUNT(*) FROM sessions
             WHERE llm_backend IS NOT NULL {date_filter}
             GROUP BY llm_backend"
        );
        let mut stmt = conn.prepare(&backend_query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (backend, count) = row?;
            summary.backend_counts.insert(backend, count.into());
        }

        Ok(summary)
    }

    pub fn get_tool_stats(&self) -> StorageResult<Vec<ToolStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT
                tool_name,
                COUNT(*) as total_calls,
                SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) as success_count,
                SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) as failure_count,
                AVG(execution_time_ms) as avg_time,
                SUM(execution_time_ms) as total_time,
                SUM(CASE WHEN is_repeated = 1 THEN 1 ELSE 0 END) as loop_count
             FROM tool_events
             GROUP BY tool_name
             ORDER BY total_calls DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ToolStats {
                tool_name: row.get(0)?,
                total_calls: row.get(1)?,
                success_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                failure_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                avg_execution_time_ms: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                total_execution_time_ms: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                loop_occurrences: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    pub fn get_quality_metrics(&self) -> StorageResult<QualityMetrics> {
        let conn = self.conn.lock().unwrap();

        let avg_messages: Option<f64> = conn.query_row(
            "SELECT AVG(user_message_count) FROM sessions WHERE outcome = 'resolved'",
            [],
            |row| row.get(0),
        )?;

        let (sessions_with_loops, total_loops): (i64, i64) = conn.query_row(
            "SELECT COUNT(DISTINCT session_id), COUNT(*) FROM tool_events WHERE is_repeated = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (total, abandoned): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), SUM(CASE WHEN outcome = 'abandoned' THEN 1 ELSE 0 END) FROM sessions",
            [],
            |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0))),
        )?;

        #[allow(clippy::cast_precision_loss)]
        let drop_off_rate = if total > 0 {
            abandoned as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(QualityMetrics {
            avg_messages_to_resolution: avg_messages.unwrap_or(0.0),
            sessions_with_loops,
            total_loop_occurrences: total_loops,
            abandoned_sessions: abandoned,
            drop_off_rate,
        })
    }

    /// Most frequent successful tool sequences
    pub fn get_common_resolution_paths(&self, limit: i64) -> StorageResult<Vec<(Vec<String>, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tool_sequence, COUNT(*) as count
             FROM resolution_paths
             WHERE was_successful = 1
             GROUP BY tool_sequence
             ORDER BY count DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut paths = Vec::new();
        for row in rows {
            let (sequence_json, count) = row?;
            let sequence: Vec<String> = serde_json::from_str(&sequence_json).unwrap_or_default();
            paths.push((sequence, count));
        }
        Ok(paths)
    }

    /// Time-bucketed cost and token sums over cloud-tagged sessions
    pub fn get_cost_by_period(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        granularity: CostGranularity,
    ) -> StorageResult<Vec<CostPeriod>> {
        let fmt = granularity.strftime_format();
        let (filter, bindings) = date_filter(start, end);

        let query = format!(
            "SELECT
                strftime('{fmt}', started_at) as period,
                SUM(estimated_cost_usd) as total_cost,
                SUM(total_prompt_tokens + total_completion_tokens) as total_tokens,
                COUNT(*) as session_count
             FROM sessions
             WHERE llm_backend IS NOT NULL AND llm_backend != 'ollama' {filter}
             GROUP BY strftime('{fmt}', started_at)
             ORDER BY period"
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
            Ok(CostPeriod {
                period: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                total_cost: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                total_tokens: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                session_count: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }
}

fn date_filter(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (String, Vec<String>) {
    let mut filter = String::new();
    let mut bindings = Vec::new();
    if let Some(start) = start {
        filter.push_str(" AND started_at >= ?");
        bindings.push(start.to_rfc3339());
    }
    if let Some(end) = end {
        filter.push_str(" AND started_at <= ?");
        bindings.push(end.to_rfc3339());
    }
    (filter, bindings)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: row.get("session_id")?,
        started_at: parse_datetime(&row.get::<_, String>("started_at")?),
        ended_at: row
            .get::<_, Option<String>>("ended_at")?
            .map(|s| parse_datetime(&s)),
        total_prompt_tokens: row.get("total_prompt_tokens")?,
        total_completion_tokens: row.get("total_completion_tokens")?,
        outcome: SessionOutcome::parse(&row.get::<_, String>("outcome")?)
            .unwrap_or(SessionOutcome::InProgress),
        feedback_score: row.get("feedback_score")?,
        feedback_comment: row.get("feedback_comment")?,
        issue_category: IssueCategory::parse(&row.get::<_, String>("issue_category")?),
        osi_layer_resolved: row.get("osi_layer_resolved")?,
        message_count: row.get("message_count")?,
        user_message_count: row.get("user_message_count")?,
        tool_call_count: row.get("tool_call_count")?,
        llm_backend: row.get("llm_backend")?,
        model_name: row.get("model_name")?,
        had_fallback: row.get::<_, i64>("had_fallback")? != 0,
        estimated_cost_usd: row.get("estimated_cost_usd")?,
        total_llm_time_ms: row.get("total_llm_time_ms")?,
        total_tool_time_ms: row.get("total_tool_time_ms")?,
        preview: row.get("preview")?,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_session(id: &str) -> Session {
        let mut session = Session::new(Some(id.to_string()));
        session.llm_backend = Some("openai".to_string());
        session.model_name = Some("gpt-4o-mini".to_string());
        session
    }

    #[test]
    fn test_session_roundtrip() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        let mut session = make_session("s1");
        session.total_prompt_tokens = 120;
        session.total_completion_tokens = 45;
        session.outcome = SessionOutcome::Resolved;
        session.ended_at = Some(Utc::now());
        session.issue_category = IssueCategory::Gateway;
        session.osi_layer_resolved = Some(3);
        session.had_fallback = true;
        session.estimated_cost_usd = 0.0123;
        session.preview = Some("My gateway ping seems off".to_string());

        storage.save_session(&session).unwrap();
        let loaded = storage.get_session("s1").unwrap().unwrap();

        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.total_prompt_tokens, 120);
        assert_eq!(loaded.total_completion_tokens, 45);
        assert_eq!(loaded.outcome, SessionOutcome::Resolved);
        assert_eq!(loaded.issue_category, IssueCategory::Gateway);
        assert_eq!(loaded.osi_layer_resolved, Some(3));
        assert!(loaded.had_fallback);
        assert!((loaded.estimated_cost_usd - 0.0123).abs() < 1e-9);
        assert_eq!(loaded.preview.as_deref(), Some("My gateway ping seems off"));
    }

    #[test]
    fn test_upsert_replaces() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        let mut session = make_session("s1");
        storage.save_session(&session).unwrap();

        session.tool_call_count = 3;
        storage.save_session(&session).unwrap();

        assert_eq!(storage.count_sessions().unwrap(), 1);
        assert_eq!(storage.get_session("s1").unwrap().unwrap().tool_call_count, 3);
    }

    #[test]
    fn test_message_ordering() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        storage.save_session(&make_session("s1")).unwrap();

        storage.save_message("s1", "user", "hello", None, None, None).unwrap();
        storage
            .save_message("s1", "assistant", "hi", None, None, None)
            .unwrap();
        storage
            .save_message("s1", "tool", "result", Some("call_1"), Some("ping_gateway"), None)
            .unwrap();

        let messages = storage.get_messages("s1").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sequence_id, 1);
        assert_eq!(messages[2].sequence_id, 3);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_delete_cascades() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        storage.save_session(&make_session("s1")).unwrap();
        storage.save_message("s1", "user", "hi", None, None, None).unwrap();
        storage
            .save_event(&Event::new("s1", EventType::UserMessage))
            .unwrap();
        storage
            .save_feedback(&Feedback {
                feedback_id: "f1".to_string(),
                session_id: "s1".to_string(),
                score: 5,
                comment: None,
                timestamp: Utc::now(),
                source: "api".to_string(),
            })
            .unwrap();

        assert!(storage.delete_session("s1").unwrap());
        assert!(storage.get_session("s1").unwrap().is_none());
        assert!(storage.get_messages("s1").unwrap().is_empty());
        assert!(storage.get_events("s1").unwrap().is_empty());
        assert!(storage.get_feedback("s1").unwrap().is_none());
        assert!(!storage.delete_session("s1").unwrap());
    }

    #[test]
    fn test_feedback_replace_semantics() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        storage.save_session(&make_session("s1")).unwrap();

        for score in [2, 5] {
            storage
                .save_feedback(&Feedback {
                    feedback_id: format!("f{score}"),
                    session_id: "s1".to_string(),
                    score,
                    comment: None,
                    timestamp: Utc::now(),
                    source: "api".to_string(),
                })
                .unwrap();
        }

        let feedback = storage.get_feedback("s1").unwrap().unwrap();
        assert_eq!(feedback.score, 5);
        assert_eq!(feedback.feedback_id, "f5");
    }

    #[test]
    fn test_session_summary() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();

        let mut resolved = make_session("s1");
        resolved.outcome = SessionOutcome::Resolved;
        resolved.ended_at = Some(resolved.started_at + chrono::Duration::seconds(60));
        resolved.total_prompt_tokens = 100;
        resolved.message_count = 4;
        resolved.estimated_cost_usd = 0.5;
        resolved.had_fallback = true;
        storage.save_session(&resolved).unwrap();

        let mut abandoned = make_session("s2");
        abandoned.outcome = SessionOutcome::Abandoned;
        abandoned.llm_backend = Some("ollama".to_string());
        storage.save_session(&abandoned).unwrap();

        let summary = storage.get_session_summary(None, None).unwrap();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.resolved_count, 1);
        assert_eq!(summary.abandoned_count, 1);
        assert_eq!(summary.fallback_count, 1);
        assert!((summary.total_cost_usd - 0.5).abs() < 1e-9);
        assert!((summary.avg_time_to_resolution_seconds - 60.0).abs() < 1.0);
        assert_eq!(summary.backend_counts["openai"], json!(1));
        assert_eq!(summary.backend_counts["ollama"], json!(1));
    }

    #[test]
    fn test_tool_stats_aggregation() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        storage.save_session(&make_session("s1")).unwrap();

        for (success, repeated, time) in [(true, false, 10), (true, true, 20), (false, false, 30)] {
            storage
                .save_tool_event(&ToolEvent {
                    event_id: uuid::Uuid::new_v4().to_string(),
                    session_id: "s1".to_string(),
                    timestamp: Utc::now(),
                    tool_name: "ping_gateway".to_string(),
                    execution_time_ms: time,
                    success,
                    error_message: None,
                    is_repeated: repeated,
                    consecutive_count: if repeated { 2 } else { 1 },
                    arguments: Map::new(),
                    result_summary: None,
                })
                .unwrap();
        }

        let stats = storage.get_tool_stats().unwrap();
        assert_eq!(stats.len(), 1);
        let stat = &stats[0];
        assert_eq!(stat.total_calls, 3);
        assert_eq!(stat.success_count, 2);
        assert_eq!(stat.failure_count, 1);
        assert_eq!(stat.total_execution_time_ms, 60);
        assert_eq!(stat.loop_occurrences, 1);
        assert!((stat.avg_execution_time_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_common_resolution_paths() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        let sequence = vec!["ping_gateway".to_string(), "ping_dns".to_string()];

        for i in 0..3 {
            storage.save_session(&make_session(&format!("s{i}"))).unwrap();
            storage
                .save_resolution_path(&ResolutionPath {
                    path_id: format!("p{i}"),
                    session_id: format!("s{i}"),
                    tool_sequence: if i < 2 {
                        sequence.clone()
                    } else {
                        vec!["enable_wifi".to_string()]
                    },
                    was_successful: i < 2,
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let paths = storage.get_common_resolution_paths(10).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].0, sequence);
        assert_eq!(paths[0].1, 2);
    }

    #[test]
    fn test_cost_by_period_excludes_sidecar() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();

        let mut cloud = make_session("s1");
        cloud.estimated_cost_usd = 1.25;
        cloud.total_prompt_tokens = 1000;
        storage.save_session(&cloud).unwrap();

        let mut local = make_session("s2");
        local.llm_backend = Some("ollama".to_string());
        local.estimated_cost_usd = 9.99; // must not appear
        storage.save_session(&local).unwrap();

        let periods = storage
            .get_cost_by_period(None, None, CostGranularity::Day)
            .unwrap();
        assert_eq!(periods.len(), 1);
        assert!((periods[0].total_cost - 1.25).abs() < 1e-9);
        assert_eq!(periods[0].session_count, 1);
    }

    #[test]
    fn test_quality_metrics() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();

        let mut resolved = make_session("s1");
        resolved.outcome = SessionOutcome::Resolved;
        resolved.user_message_count = 3;
        storage.save_session(&resolved).unwrap();

        let mut abandoned = make_session("s2");
        abandoned.outcome = SessionOutcome::Abandoned;
        storage.save_session(&abandoned).unwrap();

        let metrics = storage.get_quality_metrics().unwrap();
        assert!((metrics.avg_messages_to_resolution - 3.0).abs() < f64::EPSILON);
        assert_eq!(metrics.abandoned_sessions, 1);
        assert!((metrics.drop_off_rate - 50.0).abs() < f64::EPSILON);
    }
}
