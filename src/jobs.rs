use crate::{
    models::{ApiError, PhotoSyncRequest},
    sync::{
        RunOutcome, SyncService,
        pacing::StopHandle,
        progress::{ProgressHandle, ProgressSnapshot, RunPhase, SyncCounters},
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum JobKind {
    CatalogSync,
    PhotoSync(PhotoSyncRequest),
}

impl JobKind {
    fn name(&self) -> &'static str {
        match self {
            JobKind::CatalogSync => "catalog_sync",
            JobKind::PhotoSync(_) => "photo_sync",
        }
    }
}

/// Runs are executed one at a time by a single worker, so at most one
/// engine touches the catalog and the cursor.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    event_capacity: usize,
    retention: Duration,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    kind: JobKind,
    progress: ProgressHandle,
    stop: StopHandle,
}

struct JobEntry {
    kind: &'static str,
    state: JobState,
    progress: ProgressHandle,
    stop: StopHandle,
    finished_at: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    PausedForLimit {
        resume_at: DateTime<Utc>,
        wait_secs: u64,
    },
    Completed {
        summary: SyncCounters,
    },
    Stopped {
        summary: SyncCounters,
    },
    Failed {
        error: String,
        stage: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub kind: &'static str,
    #[serde(flatten)]
    pub state: JobState,
    pub progress: ProgressSnapshot,
}

impl JobQueue {
    pub fn spawn(service: SyncService) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let jobs_bg = jobs.clone();
        let event_capacity = service.settings().event_log_capacity;

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.stop.is_stopped() {
                    set_state(&jobs_bg, job.id, JobState::Stopped {
                        summary: SyncCounters::default(),
                    })
                    .await;
                    continue;
                }
                set_state(&jobs_bg, job.id, JobState::Running).await;
                info!(target = "supplier_sync.jobs", job_id = %job.id, kind = job.kind.name(), "job started");

                let result = match &job.kind {
                    JobKind::CatalogSync => service.run_catalog(&job.progress, &job.stop).await,
                    JobKind::PhotoSync(request) => {
                        service
                            .run_photos(job.id, request, &job.progress, &job.stop)
                            .await
                    }
                };
                let state = match result {
                    Ok(RunOutcome::Completed(summary)) => JobState::Completed { summary },
                    Ok(RunOutcome::Stopped(summary)) => JobState::Stopped { summary },
                    Err(err) => {
                        error!(
                            target = "supplier_sync.jobs",
                            job_id = %job.id,
                            stage = err.stage(),
                            "job failed: {}",
                            err.detail()
                        );
                        job.progress
                            .set_phase(RunPhase::Failed {
                                message: err.detail().to_string(),
                            })
                            .await;
                        JobState::Failed {
                            error: err.detail().to_string(),
                            stage: Some(err.stage().to_string()),
                        }
                    }
                };
                set_state(&jobs_bg, job.id, state).await;
            }
        });

        (
            Self {
                tx,
                jobs,
                event_capacity,
                retention: retention_from_env(),
            },
            handle,
        )
    }

    pub async fn enqueue(&self, kind: JobKind) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let progress = ProgressHandle::new(self.event_capacity);
        let stop = StopHandle::new();
        {
            let mut guard = self.jobs.lock().await;
            let retention = self.retention;
            guard.retain(|_, entry| {
                entry
                    .finished_at
                    .is_none_or(|at| at.elapsed() < retention)
            });
            guard.insert(
                id,
                JobEntry {
                    kind: kind.name(),
                    state: JobState::Queued,
                    progress: progress.clone(),
                    stop: stop.clone(),
                    finished_at: None,
                },
            );
        }
        let job = Job {
            id,
            kind,
            progress,
            stop,
        };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let (kind, state, progress) = {
            let guard = self.jobs.lock().await;
            let entry = guard.get(&id)?;
            (entry.kind, entry.state.clone(), entry.progress.clone())
        };
        let snapshot = progress.snapshot().await;
        let state = match (state, &snapshot.phase) {
            (JobState::Running, RunPhase::PausedForLimit { resume_at, wait_secs }) => {
                JobState::PausedForLimit {
                    resume_at: *resume_at,
                    wait_secs: *wait_secs,
                }
            }
            (state, _) => state,
        };
        Some(JobInfo {
            id: id.to_string(),
            kind,
            state,
            progress: snapshot,
        })
    }

    /// Raises the stop flag; the engine stops at its next check point.
    pub async fn stop(&self, id: Uuid) -> Option<JobInfo> {
        {
            let guard = self.jobs.lock().await;
            let entry = guard.get(&id)?;
            entry.stop.stop();
        }
        info!(target = "supplier_sync.jobs", job_id = %id, "stop requested");
        self.get(id).await
    }
}

async fn set_state(jobs: &Mutex<HashMap<Uuid, JobEntry>>, id: Uuid, state: JobState) {
    if let Some(entry) = jobs.lock().await.get_mut(&id) {
        if matches!(
            state,
            JobState::Completed { .. } | JobState::Stopped { .. } | JobState::Failed { .. }
        ) {
            entry.finished_at = Some(Instant::now());
        }
        entry.state = state;
    }
}

/// Finished jobs stay queryable this long; they are dropped on the next enqueue.
fn retention_from_env() -> Duration {
    let secs = std::env::var("JOB_RETENTION_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600);
    Duration::from_secs(secs)
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::SyncConfig;
    use crate::settings::SyncSettings;
    use crate::testing::{MemoryCatalog, ScriptedProxy, StaticConnector};
    use std::time::Duration;

    fn queue(settings: SyncSettings) -> (JobQueue, Arc<MemoryCatalog>) {
        let store = MemoryCatalog::new();
        let service = SyncService::new(
            store.clone(),
            ScriptedProxy::uploading(),
            Arc::new(StaticConnector { pages: Vec::new() }),
            SyncConfig::in_memory(),
            settings,
        );
        let (queue, _worker) = JobQueue::spawn(service);
        (queue, store)
    }

    async fn wait_until_settled(queue: &JobQueue, id: Uuid) -> JobInfo {
        for _ in 0..1000 {
            let info = queue.get(id).await.unwrap();
            if !matches!(info.state, JobState::Queued | JobState::Running | JobState::PausedForLimit { .. }) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not settle");
    }

    #[tokio::test]
    async fn failed_job_reports_stage() {
        let (queue, _) = queue(SyncSettings::default());
        let id = queue.enqueue(JobKind::CatalogSync).await.unwrap();
        let info = wait_until_settled(&queue, id).await;
        match info.state {
            JobState::Failed { stage, .. } => assert_eq!(stage.as_deref(), Some("plan")),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(info.kind, "catalog_sync");
    }

    #[tokio::test(start_paused = true)]
    async fn photo_job_completes_with_summary() {
        let settings = SyncSettings {
            photo_url_template: Some("https://photos.example/{id}".into()),
            ..SyncSettings::default()
        };
        let (queue, store) = queue(settings);
        store.seed_photo_rows(2, None);
        let id = queue
            .enqueue(JobKind::PhotoSync(PhotoSyncRequest::default()))
            .await
            .unwrap();
        let info = wait_until_settled(&queue, id).await;
        match info.state {
            JobState::Completed { summary } => assert_eq!(summary.updated, 2),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(!info.progress.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_expire_after_retention() {
        let (queue, _) = queue(SyncSettings::default());
        let first = queue.enqueue(JobKind::CatalogSync).await.unwrap();
        wait_until_settled(&queue, first).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        let second = queue.enqueue(JobKind::CatalogSync).await.unwrap();
        assert!(queue.get(first).await.is_some());
        wait_until_settled(&queue, second).await;

        tokio::time::sleep(queue.retention).await;
        let third = queue.enqueue(JobKind::CatalogSync).await.unwrap();
        assert!(queue.get(first).await.is_none());
        assert!(queue.get(second).await.is_none());
        assert!(queue.get(third).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_pauses_cleanly() {
        let settings = SyncSettings {
            photo_url_template: Some("https://photos.example/{id}".into()),
            ..SyncSettings::default()
        };
        let (queue, store) = queue(settings);
        store.seed_photo_rows(50, None);
        let id = queue
            .enqueue(JobKind::PhotoSync(PhotoSyncRequest::default()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        queue.stop(id).await.unwrap();
        let info = wait_until_settled(&queue, id).await;
        match info.state {
            JobState::Stopped { summary } => assert!(summary.updated < 50),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
