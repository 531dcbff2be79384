//! JSONL backup export and tolerant import.
//!
//! Each exported line is one JSON object.  Required keys: `role`, `content`,
//! `timestamp` (ISO 8601 UTC).  Everything else is optional, and every
//! record carries an `engine_version` so future readers can branch on
//! format changes.  Import skips malformed lines instead of aborting and
//! reports how many lines parsed.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agenthive::error::EngineError;
use crate::agenthive::store::{MessageRecord, SessionStore};

/// One exported conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub role: String,
    pub content: String,
    /// ISO 8601 UTC.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pheromone_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl MemoryRecord {
    fn from_message(message: &MessageRecord, agent_id: Option<&str>) -> Self {
        Self {
            role: message.role.clone(),
            content: message.content.clone(),
            timestamp: message.created_at,
            session_id: Some(message.session_id.clone()),
            model: message.model.clone(),
            engine_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            thinking_content: message.thinking.clone(),
            tool_calls: if message.tool_calls.is_empty() {
                None
            } else {
                serde_json::to_value(&message.tool_calls).ok()
            },
            agent_id: agent_id.map(str::to_string),
            pheromone_score: None,
            tokens: Some(message.tokens_in + message.tokens_out),
        }
    }
}

/// Writes session transcripts under `MEMORIES_PATH` and reads them back.
pub struct MemoryExporter {
    root: PathBuf,
}

impl MemoryExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Export one session's messages to `<root>/<session_id>.jsonl`.
    /// Returns the file path and the number of records written.
    pub fn export_session(
        &self,
        store: &SessionStore,
        session_id: &str,
    ) -> Result<(PathBuf, usize), EngineError> {
        let session = store
            .get_session(session_id)?
            .ok_or_else(|| crate::agenthive::engine::SessionError::NotFound(session_id.into()))?;
        let messages = store.list_messages(session_id, 1000, 0, None)?;

        fs::create_dir_all(&self.root)
            .map_err(|e| EngineError::Other(format!("cannot create export dir: {}", e)))?;
        let path = self.root.join(format!("{}.jsonl", session_id));
        let mut file = fs::File::create(&path)
            .map_err(|e| EngineError::Other(format!("cannot create export file: {}", e)))?;

        let mut written = 0;
        for message in &messages {
            let record = MemoryRecord::from_message(message, session.agent_id.as_deref());
            let line = serde_json::to_string(&record)
                .map_err(|e| EngineError::Other(format!("cannot serialise record: {}", e)))?;
            writeln!(file, "{}", line)
                .map_err(|e| EngineError::Other(format!("cannot write export: {}", e)))?;
            written += 1;
        }
        Ok((path, written))
    }

    /// Read a JSONL file, skipping malformed lines.  Returns the parsed
    /// records; the count equals the number of syntactically valid lines.
    pub fn import_file(&self, path: &Path) -> Result<Vec<MemoryRecord>, EngineError> {
        let file = fs::File::open(path)
            .map_err(|e| EngineError::Other(format!("cannot open import file: {}", e)))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in reader.lines().enumerate() {
            let line =
                line.map_err(|e| EngineError::Other(format!("cannot read import file: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    skipped += 1;
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!(
                            "MemoryExporter: skipping malformed line {}: {}",
                            line_no + 1,
                            err
                        );
                    }
                }
            }
        }
        if skipped > 0 {
            log::info!(
                "MemoryExporter: imported {} records, skipped {} malformed lines",
                records.len(),
                skipped
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenthive::store::{NewMessage, NewSession};

    #[test]
    fn export_then_import_round_trips() {
        let store = SessionStore::in_memory().unwrap();
        let session = store
            .create_session(NewSession {
                agent_id: Some("main".into()),
                ..Default::default()
            })
            .unwrap();
        store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: "user".into(),
                content: "hello".into(),
                ..Default::default()
            })
            .unwrap();
        store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: "assistant".into(),
                content: "hi there".into(),
                thinking: Some("greeting detected".into()),
                tokens_in: 5,
                tokens_out: 3,
                ..Default::default()
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let exporter = MemoryExporter::new(dir.path());
        let (path, written) = exporter.export_session(&store, &session.id).unwrap();
        assert_eq!(written, 2);

        let records = exporter.import_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].role, "user");
        assert_eq!(records[0].content, "hello");
        assert_eq!(records[1].thinking_content.as_deref(), Some("greeting detected"));
        assert_eq!(records[1].tokens, Some(8));
        assert!(records[1].engine_version.is_some());
        assert_eq!(records[1].agent_id.as_deref(), Some("main"));
    }

    #[test]
    fn import_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"role\":\"user\",\"content\":\"ok\",\"timestamp\":\"2026-01-01T00:00:00Z\"}\n",
                "this is not json\n",
                "{\"role\":\"assistant\"}\n",
                "{\"role\":\"assistant\",\"content\":\"fine\",\"timestamp\":\"2026-01-01T00:00:01Z\",\"unknown_field\":42}\n",
            ),
        )
        .unwrap();

        let exporter = MemoryExporter::new(dir.path());
        let records = exporter.import_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].content, "fine");
    }
}
