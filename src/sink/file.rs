//! Rotating file sink
//!
//! Appends one formatted rendering per event to `<path>/<file_name>`.
//! Rotation renames the live file to `<file_name>.<stamp>` and starts a
//! fresh one; pruning then keeps only the newest `max_files` rotated files.

use crate::clock::{Clock, SystemClock};
use crate::context::Context;
use crate::error::{EventError, Result};
use crate::node::{Node, NodeType};
use crate::types::{Event, JSON_FORMAT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// File sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSinkConfig {
    /// Directory holding the live and rotated files
    pub path: PathBuf,

    /// Name of the live file
    pub file_name: String,

    /// Which `event.formatted` entry to write
    #[serde(default = "default_format")]
    pub format: String,

    /// Rotate once the live file holds at least this many bytes (0 = never)
    #[serde(default)]
    pub max_bytes: u64,

    /// Rotate once the live file is this old, in seconds (0 = never)
    #[serde(default)]
    pub max_duration_secs: u64,

    /// Rotated files to keep (0 = keep all)
    #[serde(default)]
    pub max_files: usize,

    /// Unix permission bits for new files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
}

fn default_format() -> String {
    JSON_FORMAT.to_string()
}

impl FileSinkConfig {
    pub fn new(path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_name: file_name.into(),
            format: default_format(),
            max_bytes: 0,
            max_duration_secs: 0,
            max_files: 0,
            file_mode: None,
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.file_name.is_empty() {
            return Err(EventError::Config(
                "File sink requires a file name".to_string(),
            ));
        }
        if self.file_name.contains('/') || self.file_name.contains(std::path::MAIN_SEPARATOR) {
            return Err(EventError::Config(format!(
                "File name '{}' must not contain a path separator",
                self.file_name
            )));
        }
        if self.format.is_empty() {
            return Err(EventError::Config(
                "File sink requires a format".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mutable sink state, guarded by the sink's mutex
#[derive(Default)]
struct SinkState {
    file: Option<File>,
    opened_at: Option<DateTime<Utc>>,
    bytes_written: u64,
    last_stamp: i64,
}

/// Sink appending formatted events to a rotating file
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    max_duration: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<SinkState>,
}

impl FileSink {
    pub fn new(config: FileSinkConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Sink whose rotation decisions and stamps use `clock`
    pub fn with_clock(config: FileSinkConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("file-sink:{}", config.file_name),
            max_duration: config.max_duration(),
            config,
            clock,
            state: Mutex::new(SinkState::default()),
        })
    }

    /// Override the maximum file age with sub-second precision
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn config(&self) -> &FileSinkConfig {
        &self.config
    }

    /// Full path of the live file
    pub fn live_path(&self) -> PathBuf {
        self.config.path.join(&self.config.file_name)
    }

    /// Open the live file now instead of on the first event
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.file.is_none() {
            self.open_live(&mut state).await?;
        }
        Ok(())
    }

    async fn open_live(&self, state: &mut SinkState) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.path)
            .await
            .map_err(|e| EventError::io("create directory", &self.config.path, e))?;

        let path = self.live_path();
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        if let Some(mode) = self.config.file_mode {
            options.mode(mode);
        }

        let file = options
            .open(&path)
            .await
            .map_err(|e| EventError::io("open", &path, e))?;

        state.file = Some(file);
        state.opened_at = Some(self.clock.now());
        state.bytes_written = 0;

        tracing::debug!(path = %path.display(), "File sink opened");
        Ok(())
    }

    fn needs_rotation(&self, state: &SinkState, now: DateTime<Utc>) -> bool {
        if self.config.max_bytes > 0 && state.bytes_written >= self.config.max_bytes {
            return true;
        }
        if self.max_duration.is_zero() {
            return false;
        }
        match state.opened_at {
            Some(opened_at) => (now - opened_at)
                .to_std()
                .map(|age| age >= self.max_duration)
                .unwrap_or(false),
            None => false,
        }
    }

    async fn close(state: &mut SinkState, path: &Path) -> Result<()> {
        if let Some(mut file) = state.file.take() {
            file.flush()
                .await
                .map_err(|e| EventError::io("flush", path, e))?;
        }
        state.opened_at = None;
        state.bytes_written = 0;
        Ok(())
    }

    async fn rotate(&self, state: &mut SinkState, now: DateTime<Utc>) -> Result<()> {
        let live = self.live_path();
        Self::close(state, &live).await?;

        // Stamps must be unique even when rotations land on the same instant
        let stamp = now
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX)
            .max(state.last_stamp.saturating_add(1));
        state.last_stamp = stamp;

        let rotated = self
            .config
            .path
            .join(format!("{}.{}", self.config.file_name, stamp));
        tokio::fs::rename(&live, &rotated)
            .await
            .map_err(|e| EventError::io("rename", &live, e))?;

        tracing::info!(
            from = %live.display(),
            to = %rotated.display(),
            "Rotated log file"
        );

        self.open_live(state).await?;

        if self.config.max_files > 0 {
            self.prune().await?;
        }
        Ok(())
    }

    /// Delete rotated files beyond the newest `max_files`
    async fn prune(&self) -> Result<()> {
        let mut rotated = self.rotated_files().await?;
        if rotated.len() <= self.config.max_files {
            return Ok(());
        }

        rotated.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.stamp.cmp(&a.stamp)));
        for stale in rotated.into_iter().skip(self.config.max_files) {
            tokio::fs::remove_file(&stale.path)
                .await
                .map_err(|e| EventError::io("remove", &stale.path, e))?;
            tracing::debug!(path = %stale.path.display(), "Pruned rotated log file");
        }
        Ok(())
    }

    /// Rotated files of this sink, in no particular order
    async fn rotated_files(&self) -> Result<Vec<RotatedFile>> {
        let dir = &self.config.path;
        let prefix = format!("{}.", self.config.file_name);
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| EventError::io("read directory", dir, e))?;

        let mut rotated = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EventError::io("read directory", dir, e))?
        {
            let file_name = entry.file_name();
            let Some(stamp) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|suffix| suffix.parse::<i64>().ok())
            else {
                continue;
            };

            let path = entry.path();
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| EventError::io("stat", &path, e))?;
            if !metadata.is_file() {
                continue;
            }
            rotated.push(RotatedFile {
                path,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                stamp,
            });
        }
        Ok(rotated)
    }
}

struct RotatedFile {
    path: PathBuf,
    modified: SystemTime,
    stamp: i64,
}

#[async_trait]
impl Node for FileSink {
    async fn process(&self, ctx: &Context, event: Event) -> Result<Option<Event>> {
        ctx.check()?;

        let data = event
            .formatted
            .get(&self.config.format)
            .ok_or_else(|| EventError::MissingFormat {
                node: self.name.clone(),
                format: self.config.format.clone(),
            })?;

        let mut state = self.state.lock().await;
        if state.file.is_none() {
            self.open_live(&mut state).await?;
        } else {
            let now = self.clock.now();
            if self.needs_rotation(&state, now) {
                self.rotate(&mut state, now).await?;
            }
        }

        let live = self.live_path();
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| EventError::Config("File sink has no open file".to_string()))?;
        file.write_all(data)
            .await
            .map_err(|e| EventError::io("write", &live, e))?;
        file.flush()
            .await
            .map_err(|e| EventError::io("flush", &live, e))?;
        state.bytes_written += data.len() as u64;

        Ok(None)
    }

    async fn reopen(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::close(&mut state, &self.live_path()).await?;
        tracing::debug!(sink = %self.name, "File sink closed for reopen");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }
}
