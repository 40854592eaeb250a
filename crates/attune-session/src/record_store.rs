use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use attune_core::{current_unix_timestamp_ms, write_text_atomic};
use serde::{Deserialize, Serialize};

const SESSION_RECORDS_SCHEMA_VERSION: u32 = 1;
pub const SESSION_RECORDS_FILE_NAME: &str = "sessions.json";

/// Locally remembered session, numbered in creation order for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub display_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionIndex {
    schema_version: u32,
    #[serde(default)]
    active_session_id: Option<String>,
    #[serde(default = "first_display_number")]
    next_display_number: u64,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

fn first_display_number() -> u64 {
    1
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self {
            schema_version: SESSION_RECORDS_SCHEMA_VERSION,
            active_session_id: None,
            next_display_number: first_display_number(),
            sessions: Vec::new(),
        }
    }
}

/// JSON index of known sessions under a state directory.
///
/// Every mutation is written through atomically, so the file on disk always
/// matches the in-memory view.
#[derive(Debug)]
pub struct SessionRecordStore {
    path: PathBuf,
    index: SessionIndex,
}

impl SessionRecordStore {
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(SESSION_RECORDS_FILE_NAME);
        let mut index = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read session records {}", path.display()))?;
            serde_json::from_str::<SessionIndex>(&raw).with_context(|| {
                format!("failed to parse session records {}", path.display())
            })?
        } else {
            SessionIndex::default()
        };

        if index.schema_version != SESSION_RECORDS_SCHEMA_VERSION {
            bail!(
                "unsupported session records schema: expected {}, found {}",
                SESSION_RECORDS_SCHEMA_VERSION,
                index.schema_version
            );
        }

        let highest = index
            .sessions
            .iter()
            .map(|record| record.display_number)
            .max()
            .unwrap_or_default();
        index.next_display_number = index.next_display_number.max(highest.saturating_add(1));
        sort_records(&mut index.sessions);
        Ok(Self { path, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `session_id` (assigning the next display number when new) and
    /// marks it active. A `None` token keeps any stored token.
    pub fn upsert_session(
        &mut self,
        session_id: &str,
        session_token: Option<&str>,
    ) -> Result<SessionRecord> {
        if session_id.trim().is_empty() {
            bail!("session id must not be empty");
        }
        let now_ms = current_unix_timestamp_ms();
        let record = match self.position(session_id) {
            Some(position) => {
                let record = &mut self.index.sessions[position];
                if let Some(token) = session_token {
                    record.session_token = Some(token.to_string());
                }
                record.updated_at_ms = now_ms;
                record.clone()
            }
            None => {
                let record = SessionRecord {
                    session_id: session_id.to_string(),
                    display_number: self.index.next_display_number,
                    session_token: session_token.map(str::to_string),
                    chat_group_id: None,
                    chat_id: None,
                    created_at_ms: now_ms,
                    updated_at_ms: now_ms,
                };
                self.index.next_display_number = self.index.next_display_number.saturating_add(1);
                self.index.sessions.push(record.clone());
                sort_records(&mut self.index.sessions);
                record
            }
        };
        self.index.active_session_id = Some(record.session_id.clone());
        self.save()?;
        Ok(record)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.index
            .sessions
            .iter()
            .find(|record| record.session_id == session_id)
    }

    /// Newest first (highest display number).
    pub fn list(&self) -> &[SessionRecord] {
        &self.index.sessions
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.index.active_session_id.as_deref()
    }

    pub fn set_active(&mut self, session_id: Option<&str>) -> Result<()> {
        if let Some(session_id) = session_id {
            if self.get(session_id).is_none() {
                bail!("unknown session '{session_id}'");
            }
        }
        let next = session_id.map(str::to_string);
        if self.index.active_session_id == next {
            return Ok(());
        }
        self.index.active_session_id = next;
        self.save()
    }

    /// Stores the chat group learned from the voice provider. Returns whether
    /// anything changed. Unknown sessions are recorded first.
    pub fn update_chat_group(
        &mut self,
        session_id: &str,
        chat_group_id: &str,
        chat_id: Option<&str>,
    ) -> Result<bool> {
        if self.get(session_id).is_none() {
            self.upsert_session(session_id, None)?;
        }
        let Some(position) = self.position(session_id) else {
            bail!("session '{session_id}' was not recorded");
        };
        let record = &mut self.index.sessions[position];
        let chat_id = chat_id.map(str::to_string).or_else(|| record.chat_id.clone());
        if record.chat_group_id.as_deref() == Some(chat_group_id) && record.chat_id == chat_id {
            return Ok(false);
        }
        record.chat_group_id = Some(chat_group_id.to_string());
        record.chat_id = chat_id;
        record.updated_at_ms = current_unix_timestamp_ms();
        self.save()?;
        Ok(true)
    }

    /// Forgets a session. When it was active, the newest remaining session
    /// becomes active.
    pub fn remove(&mut self, session_id: &str) -> Result<bool> {
        let Some(position) = self.position(session_id) else {
            return Ok(false);
        };
        self.index.sessions.remove(position);
        if self.index.active_session_id.as_deref() == Some(session_id) {
            self.index.active_session_id = self
                .index
                .sessions
                .first()
                .map(|record| record.session_id.clone());
        }
        self.save()?;
        Ok(true)
    }

    fn position(&self, session_id: &str) -> Option<usize> {
        self.index
            .sessions
            .iter()
            .position(|record| record.session_id == session_id)
    }

    fn save(&self) -> Result<()> {
        let mut payload = serde_json::to_string_pretty(&self.index)
            .context("failed to serialize session records")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write session records {}", self.path.display()))
    }
}

fn sort_records(records: &mut [SessionRecord]) {
    records.sort_by(|left, right| right.display_number.cmp(&left.display_number));
}
