//! Live run state shared between an engine and whoever polls the job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Mutex;

pub const DEFAULT_EVENT_CAPACITY: usize = 200;

/// Running totals of one run. Also returned as the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    /// Known only for photo runs (exact count at start).
    pub total: Option<u64>,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub pages: u64,
    /// Upstream requests issued in this session; drives photo pacing.
    pub requests: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    FetchingPage { page: u64, offset: usize },
    Transforming { page: u64 },
    Diffing { page: u64 },
    Writing { page: u64 },
    Running,
    PausedForLimit { resume_at: DateTime<Utc>, wait_secs: u64 },
    Done,
    Stopped,
    Exhausted,
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEvent {
    pub at: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    #[serde(flatten)]
    pub phase: RunPhase,
    pub counters: SyncCounters,
    pub events: Vec<SyncEvent>,
}

#[derive(Debug)]
struct ProgressState {
    phase: RunPhase,
    counters: SyncCounters,
    events: VecDeque<SyncEvent>,
    capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressHandle {
    inner: Arc<Mutex<ProgressState>>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ProgressHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressState {
                phase: RunPhase::Idle,
                counters: SyncCounters::default(),
                events: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
            })),
        }
    }

    pub async fn set_phase(&self, phase: RunPhase) {
        self.inner.lock().await.phase = phase;
    }

    pub async fn phase(&self) -> RunPhase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn update(&self, apply: impl FnOnce(&mut SyncCounters)) {
        apply(&mut self.inner.lock().await.counters);
    }

    pub async fn counters(&self) -> SyncCounters {
        self.inner.lock().await.counters.clone()
    }

    /// Appends to the rolling log, dropping the oldest entry when full.
    pub async fn record(&self, level: EventLevel, message: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        if guard.events.len() == guard.capacity {
            guard.events.pop_front();
        }
        guard.events.push_back(SyncEvent {
            at: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        let guard = self.inner.lock().await;
        ProgressSnapshot {
            phase: guard.phase.clone(),
            counters: guard.counters.clone(),
            events: guard.events.iter().cloned().collect(),
        }
    }
}
