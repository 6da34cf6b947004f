//! Daily progress tracker: per (instance, task) counters that reset lazily
//! at a configured local hour and survive restarts.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::TrackerError;
use crate::logger;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Runs reported since the last reset.
    pub attempts: u32,
    /// Sum of reported deltas since the last reset.
    pub successes: u32,
    pub last_reset: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_ready_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
}

/// instance -> task id -> record
pub type TrackerState = BTreeMap<String, BTreeMap<String, TaskRecord>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    #[serde(default)]
    instances: TrackerState,
}

/// Durable key-value backing for the tracker.
pub trait TrackerStore: Send {
    fn load(&mut self) -> Result<TrackerState, TrackerError>;
    fn save(&mut self, state: &TrackerState) -> Result<(), TrackerError>;
}

/// JSON file replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrackerStore for JsonFileStore {
    fn load(&mut self) -> Result<TrackerState, TrackerError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TrackerState::new()),
            Err(source) => return Err(TrackerError::Io { path: self.path.clone(), source }),
        };
        let file: TrackerFile = serde_json::from_str(&text)
            .map_err(|source| TrackerError::Corrupt { path: self.path.clone(), source })?;
        Ok(file.instances)
    }

    fn save(&mut self, state: &TrackerState) -> Result<(), TrackerError> {
        let io_err = |source| TrackerError::Io { path: self.path.clone(), source };
        let data = serde_json::to_vec_pretty(&TrackerFile { instances: state.clone() })
            .map_err(|e| TrackerError::Unavailable(e.to_string()))?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&data).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// In-memory store. Clones share contents, so tests can inspect saves and
/// switch the store off to simulate an outage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<TrackerState>>,
    offline: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> TrackerState {
        self.state.lock().unwrap().clone()
    }
}

impl TrackerStore for MemoryStore {
    fn load(&mut self) -> Result<TrackerState, TrackerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TrackerError::Unavailable("memory store offline".into()));
        }
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&mut self, state: &TrackerState) -> Result<(), TrackerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TrackerError::Unavailable("memory store offline".into()));
        }
        *self.state.lock().unwrap() = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a finished run reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub delta: u32,
    /// Do not run the task again before this much time has passed.
    pub cooldown: Option<Duration>,
    pub outcome: String,
}

/// The narrow interface the engine needs from the tracker.
pub trait ProgressLedger: Send + Sync {
    fn should_run(&self, instance: &str, task: &str) -> Result<bool, TrackerError>;
    fn record_progress(&self, instance: &str, task: &str, progress: &Progress) -> Result<(), TrackerError>;
}

struct Inner {
    store: Box<dyn TrackerStore>,
    state: TrackerState,
    dirty: bool,
}

impl Inner {
    fn flush(&mut self) -> Result<(), TrackerError> {
        match self.store.save(&self.state) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                Err(e)
            }
        }
    }
}

pub struct DailyTracker {
    inner: Mutex<Inner>,
    reset_time: NaiveTime,
    limits: BTreeMap<String, u32>,
}

impl DailyTracker {
    /// Load persisted counters. An unreadable store is an error, never an empty start.
    pub fn open(
        mut store: Box<dyn TrackerStore>,
        reset_hour_local: u32,
        limits: BTreeMap<String, u32>,
    ) -> Result<Self, TrackerError> {
        let reset_time = NaiveTime::from_hms_opt(reset_hour_local, 0, 0)
            .ok_or_else(|| TrackerError::Unavailable(format!("invalid reset hour {}", reset_hour_local)))?;
        let state = store.load()?;
        Ok(Self {
            inner: Mutex::new(Inner { store, state, dirty: false }),
            reset_time,
            limits,
        })
    }

    pub fn limit(&self, task: &str) -> Option<u32> {
        self.limits.get(task).copied()
    }

    /// Most recent reset boundary at or before `now`.
    pub fn reset_anchor(&self, now: NaiveDateTime) -> NaiveDateTime {
        let anchor = now.date().and_time(self.reset_time);
        if now < anchor {
            anchor - chrono::Duration::days(1)
        } else {
            anchor
        }
    }

    fn current<'a>(&self, state: &'a mut TrackerState, instance: &str, task: &str, now: NaiveDateTime) -> &'a mut TaskRecord {
        let anchor = self.reset_anchor(now);
        let record = state
            .entry(instance.to_string())
            .or_default()
            .entry(task.to_string())
            .or_default();
        if record.last_reset.map_or(true, |t| t < anchor) {
            record.attempts = 0;
            record.successes = 0;
            record.last_reset = Some(anchor);
        }
        record
    }

    /// Counters as of `now`, with any pending rollover applied. Never writes.
    pub fn record_at(&self, instance: &str, task: &str, now: NaiveDateTime) -> TaskRecord {
        let inner = self.inner.lock().unwrap();
        let mut record = inner
            .state
            .get(instance)
            .and_then(|tasks| tasks.get(task))
            .cloned()
            .unwrap_or_default();
        let anchor = self.reset_anchor(now);
        if record.last_reset.map_or(true, |t| t < anchor) {
            record.attempts = 0;
            record.successes = 0;
            record.last_reset = Some(anchor);
        }
        record
    }

    pub fn record(&self, instance: &str, task: &str) -> TaskRecord {
        self.record_at(instance, task, Local::now().naive_local())
    }

    /// Applies a pending rollover in memory. Returns true when one happened.
    pub fn reset_if_elapsed_at(&self, instance: &str, task: &str, now: NaiveDateTime) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let anchor = self.reset_anchor(now);
        let stale = inner
            .state
            .get(instance)
            .and_then(|tasks| tasks.get(task))
            .map_or(false, |r| r.last_reset.map_or(true, |t| t < anchor));
        if stale {
            self.current(&mut inner.state, instance, task, now);
        }
        stale
    }

    pub fn should_run_at(&self, instance: &str, task: &str, now: NaiveDateTime) -> Result<bool, TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.dirty {
            inner.flush()?;
        }
        let record = self.current(&mut inner.state, instance, task, now);
        if record.next_ready_at.map_or(false, |t| t > now) {
            return Ok(false);
        }
        Ok(match self.limits.get(task) {
            Some(limit) => record.successes < *limit,
            None => true,
        })
    }

    pub fn record_progress_at(
        &self,
        instance: &str,
        task: &str,
        progress: &Progress,
        now: NaiveDateTime,
    ) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        let record = self.current(&mut inner.state, instance, task, now);
        record.attempts += 1;
        record.successes += progress.delta;
        record.updated_at = Some(now);
        // Runs without a cooldown (including gated skips) keep the existing one.
        if let Some(cd) = progress.cooldown {
            record.next_ready_at = Some(now + chrono::Duration::from_std(cd).unwrap_or_else(|_| chrono::Duration::days(1)));
        }
        record.last_outcome = Some(progress.outcome.clone());
        let summary = format!(
            "{}/{}: +{} ({} today, {} runs)",
            instance, task, progress.delta, record.successes, record.attempts
        );
        inner.dirty = true;
        match inner.flush() {
            Ok(()) => {
                logger::info_p("tracker", &summary);
                Ok(())
            }
            Err(e) => {
                logger::error_p("tracker", &format!("{} not persisted: {}", summary, e));
                Err(e)
            }
        }
    }

    /// Retry a save that failed earlier. No-op when nothing is pending.
    pub fn flush(&self) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.dirty {
            inner.flush()?;
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().unwrap().dirty
    }
}

impl ProgressLedger for DailyTracker {
    fn should_run(&self, instance: &str, task: &str) -> Result<bool, TrackerError> {
        self.should_run_at(instance, task, Local::now().naive_local())
    }

    fn record_progress(&self, instance: &str, task: &str, progress: &Progress) -> Result<(), TrackerError> {
        self.record_progress_at(instance, task, progress, Local::now().naive_local())
    }
}
