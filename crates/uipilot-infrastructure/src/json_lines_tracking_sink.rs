//! Durable, append-only tracking sink.
//!
//! Directory structure:
//! ```text
//! routes_dir/
//! ├── <session-id-1>.jsonl
//! └── <session-id-2>.jsonl
//! ```
//!
//! Each line is one `RouteEntry`. Appends for one session are serialized by
//! a per-session lock; different sessions write to different files and never
//! contend. A torn final line (crash mid-write) is skipped on load and cut
//! off before the next append.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uipilot_core::action::ActionRecord;
use uipilot_core::error::{PilotError, Result};
use uipilot_core::route::{PlannedStep, Route, RouteClosure, TrackingSink};

const EXTENSION: &str = "jsonl";

/// One line of a route file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum RouteEntry {
    Planned(PlannedStep),
    Action(ActionRecord),
    Closure(RouteClosure),
}

pub struct JsonLinesTrackingSink {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonLinesTrackingSink {
    /// Opens (and creates if needed) a route store rooted at `dir`.
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Opens the store at the default data location.
    pub async fn default_location() -> Result<Self> {
        let dir = crate::paths::PilotPaths::routes_dir()
            .map_err(|e| PilotError::io(format!("Failed to resolve routes directory: {e}")))?;
        Self::new(dir).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.{EXTENSION}")))
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn append(&self, session_id: &str, entry: &RouteEntry) -> Result<()> {
        let path = self.file_for(session_id)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        repair_tail(session_id, &path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Makes sure the file ends on a line boundary.
///
/// An unterminated final line that still parses gets its newline; anything
/// else after the last newline is truncated.
async fn repair_tail(session_id: &str, path: &Path) -> Result<()> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    file.seek(SeekFrom::Start(0)).await?;
    let mut content = Vec::new();
    file.read_to_end(&mut content).await?;
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);

    if serde_json::from_slice::<RouteEntry>(&content[keep..]).is_ok() {
        file.seek(SeekFrom::End(0)).await?;
        file.write_all(b"\n").await?;
    } else {
        tracing::warn!(
            session_id,
            dropped_bytes = content.len() - keep,
            "Truncating torn route entry before append"
        );
        file.set_len(keep as u64).await?;
    }
    file.sync_data().await?;
    Ok(())
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PilotError::data_access(format!(
            "Invalid session id for route storage: {session_id:?}"
        )))
    }
}

/// Folds route file content into a `Route`.
///
/// A line that fails to parse is tolerated only if it is the last one.
fn fold_lines(session_id: &str, content: &str) -> Result<Route> {
    let mut route = Route::new(session_id);
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let last = lines.len().saturating_sub(1);

    for (index, line) in lines.iter().enumerate() {
        match serde_json::from_str::<RouteEntry>(line) {
            Ok(RouteEntry::Planned(planned)) => route.planned.push(planned),
            Ok(RouteEntry::Action(record)) => route.actual.push(record),
            Ok(RouteEntry::Closure(closure)) => route.closure = Some(closure),
            Err(e) if index == last => {
                tracing::warn!(session_id, error = %e, "Skipping torn trailing route entry");
            }
            Err(e) => {
                return Err(PilotError::data_access(format!(
                    "Corrupt route entry {} for session {session_id}: {e}",
                    index + 1
                )));
            }
        }
    }
    Ok(route)
}

#[async_trait]
impl TrackingSink for JsonLinesTrackingSink {
    async fn append_planned(&self, session_id: &str, planned: PlannedStep) -> Result<()> {
        self.append(session_id, &RouteEntry::Planned(planned)).await
    }

    async fn append_action(&self, record: ActionRecord) -> Result<()> {
        let session_id = record.session_id.clone();
        self.append(&session_id, &RouteEntry::Action(record)).await
    }

    async fn append_closure(&self, session_id: &str, closure: RouteClosure) -> Result<()> {
        self.append(session_id, &RouteEntry::Closure(closure)).await
    }

    async fn load(&self, session_id: &str) -> Result<Option<Route>> {
        let path = self.file_for(session_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fold_lines(session_id, &content).map(Some)
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uipilot_core::session::SessionStatus;

    #[test]
    fn rejects_path_like_session_ids() {
        assert!(validate_session_id("3f2a-b9_c").is_ok());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("").is_err());
    }

    #[test]
    fn torn_last_line_is_skipped() {
        let closure = serde_json::to_string(&RouteEntry::Closure(RouteClosure::new(
            SessionStatus::Cancelled,
            "cancelled by user",
        )))
        .unwrap();
        let content = format!("{closure}\n{{\"entry\":\"planned\",\"st");
        let route = fold_lines("s1", &content).unwrap();
        assert_eq!(route.closure.unwrap().status, SessionStatus::Cancelled);
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let closure = serde_json::to_string(&RouteEntry::Closure(RouteClosure::new(
            SessionStatus::Failed,
            "capture exhausted",
        )))
        .unwrap();
        let content = format!("garbage\n{closure}\n");
        assert!(fold_lines("s1", &content).is_err());
    }

    #[tokio::test]
    async fn load_of_unknown_session_is_none() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesTrackingSink::new(dir.path()).await.unwrap();
        assert!(sink.load("nobody").await.unwrap().is_none());
        assert!(sink.session_ids().await.unwrap().is_empty());
    }
}
