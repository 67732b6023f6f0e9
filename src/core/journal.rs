//! Step observers and the append-only run journal.
//!
//! Events are stored as newline-delimited JSON (JSONL), one file per run,
//! for simple inspection and replay.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{EventType, RunReport, StepEvent};

/// Receives every event the executor emits
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_event(&self, event: &StepEvent) -> Result<()>;
}

/// File-based journal: `<dir>/<run_id>.jsonl`
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Journal rooted at `dir` (created on first append)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Journal in the configured location (~/.autoplay/journal or $AUTOPLAY_HOME/journal)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::journal_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the events file of a run
    pub fn events_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.jsonl", run_id))
    }

    /// Append an event to its run's log
    pub async fn append(&self, event: &StepEvent) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create journal directory: {}", self.dir.display()))?;

        let path = self.events_path(event.run_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events of a run in order
    pub async fn replay(&self, run_id: Uuid) -> Result<Vec<StepEvent>> {
        let path = self.events_path(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: StepEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild a run's report from its events
    pub async fn report(&self, run_id: Uuid) -> Result<Option<RunReport>> {
        let events = self.replay(run_id).await?;
        Ok(RunReport::from_events(&events))
    }

    /// All run ids with a journal file
    pub async fn list_runs(&self) -> Result<Vec<Uuid>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                runs.push(id);
            }
        }

        runs.sort();
        Ok(runs)
    }
}

#[async_trait]
impl StepObserver for Journal {
    async fn on_event(&self, event: &StepEvent) -> Result<()> {
        self.append(event).await
    }
}

/// Keeps events in memory, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StepEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(path, event type)` pairs, in emission order
    pub fn trace(&self) -> Vec<(String, EventType)> {
        self.events()
            .into_iter()
            .map(|e| (e.path.to_string(), e.event_type))
            .collect()
    }
}

#[async_trait]
impl StepObserver for RecordingObserver {
    async fn on_event(&self, event: &StepEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
