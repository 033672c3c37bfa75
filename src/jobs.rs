// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Background job dispatch for synchronization and relocation runs
//!
//! Each request returns a [`JobHandle`] immediately; the work itself runs on
//! the tokio blocking pool. Requests must therefore be made from within a
//! tokio runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::events::{JobEvent, Notification};
use crate::pipeline::Pipeline;
use crate::relocate::RelocationItem;
use crate::{DropsortError, Result};

/// Finished jobs kept for status queries before the oldest are forgotten
pub const FINISHED_JOB_RETENTION: usize = 100;

/// Token for cooperative cancellation of a running job
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DropsortError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Synchronize,
    Relocate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { summary: serde_json::Value },
    Failed { error: String },
    /// Relocations report what they moved before stopping
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<serde_json::Value>,
    },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// Returned to the caller as soon as a job is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: JobKind,
}

/// Snapshot of a job for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub kind: JobKind,
    #[serde(flatten)]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a job's work hands back to the dispatcher
#[derive(Debug)]
enum JobOutcome {
    Completed(serde_json::Value),
    Cancelled(Option<serde_json::Value>),
}

impl JobOutcome {
    fn into_status(result: Result<JobOutcome>) -> JobStatus {
        match result {
            Ok(JobOutcome::Completed(summary)) => JobStatus::Completed { summary },
            Ok(JobOutcome::Cancelled(summary)) => JobStatus::Cancelled { summary },
            Err(DropsortError::Cancelled) => JobStatus::Cancelled { summary: None },
            Err(e) => JobStatus::Failed { error: e.to_string() },
        }
    }
}

struct JobEntry {
    info: JobInfo,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Runs pipeline jobs in the background and tracks their status
#[derive(Clone)]
pub struct JobDispatcher {
    pipeline: Arc<Pipeline>,
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    retention: usize,
}

impl JobDispatcher {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self::with_retention(pipeline, FINISHED_JOB_RETENTION)
    }

    /// Keep at most `retention` finished jobs; queued and running jobs are
    /// always kept
    pub fn with_retention(pipeline: Arc<Pipeline>, retention: usize) -> Self {
        Self {
            pipeline,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            retention: retention.max(1),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Schedule a synchronization pass
    ///
    /// While one is queued or running, its handle is returned instead of
    /// starting another.
    pub fn request_synchronize(&self) -> Result<JobHandle> {
        let mut jobs = self.lock_jobs()?;
        if let Some(entry) = jobs
            .values()
            .find(|e| e.info.kind == JobKind::Synchronize && !e.info.status.is_finished())
        {
            debug!("Synchronization {} already in flight", entry.info.id);
            return Ok(JobHandle { id: entry.info.id, kind: JobKind::Synchronize });
        }

        let pipeline = self.pipeline.clone();
        Ok(self.spawn(&mut jobs, JobKind::Synchronize, move |id, cancel| {
            let report = pipeline.synchronize(&id.to_string(), cancel)?;
            Ok(JobOutcome::Completed(serde_json::to_value(report)?))
        }))
    }

    /// Schedule a relocation batch
    pub fn request_relocate(&self, items: Vec<RelocationItem>) -> Result<JobHandle> {
        let mut jobs = self.lock_jobs()?;
        let pipeline = self.pipeline.clone();
        Ok(self.spawn(&mut jobs, JobKind::Relocate, move |id, cancel| {
            relocate_batch(&pipeline, &items, id, cancel)
        }))
    }

    /// Ask a job to stop at its next checkpoint
    pub fn cancel(&self, id: Uuid) -> Result<bool> {
        let jobs = self.lock_jobs()?;
        match jobs.get(&id) {
            Some(entry) if !entry.info.status.is_finished() => {
                entry.cancel.cancel();
                info!("Sent cancel signal to job {}", id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn status(&self, id: Uuid) -> Result<Option<JobInfo>> {
        Ok(self.lock_jobs()?.get(&id).map(|e| e.info.clone()))
    }

    /// All known jobs, newest first
    pub fn jobs(&self) -> Result<Vec<JobInfo>> {
        let mut infos: Vec<JobInfo> = self.lock_jobs()?.values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(infos)
    }

    /// Wait for a job to finish and return its final status
    ///
    /// `None` if the job is unknown or was already pruned.
    pub async fn wait(&self, id: Uuid) -> Result<Option<JobInfo>> {
        let task = self.lock_jobs()?.get_mut(&id).and_then(|e| e.task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Job {} task failed: {}", id, e);
                self.finish(id, JobStatus::Failed { error: format!("job task failed: {}", e) });
            }
        }
        self.status(id)
    }

    fn spawn<F>(&self, jobs: &mut HashMap<Uuid, JobEntry>, kind: JobKind, work: F) -> JobHandle
    where
        F: FnOnce(Uuid, &CancellationToken) -> Result<JobOutcome> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let dispatcher = self.clone();
        let token = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            dispatcher.set_status(id, JobStatus::Running);
            dispatcher.publish(id, format!("{:?} job started", kind), JobEvent::Started);

            let status = JobOutcome::into_status(work(id, &token));
            dispatcher.finish(id, status);
        });

        jobs.insert(
            id,
            JobEntry {
                info: JobInfo {
                    id,
                    kind,
                    status: JobStatus::Queued,
                    created_at: Utc::now(),
                    finished_at: None,
                },
                cancel,
                task: Some(task),
            },
        );
        info!("Queued {:?} job {}", kind, id);
        JobHandle { id, kind }
    }

    fn finish(&self, id: Uuid, status: JobStatus) {
        let (message, event) = match &status {
            JobStatus::Completed { .. } => ("job completed".to_string(), JobEvent::Finished),
            JobStatus::Cancelled { .. } => ("job cancelled".to_string(), JobEvent::Cancelled),
            JobStatus::Failed { error } => (format!("job failed: {}", error), JobEvent::Failed),
            JobStatus::Queued | JobStatus::Running => return,
        };
        match &status {
            JobStatus::Failed { error } => error!("Job {} failed: {}", id, error),
            _ => info!("Job {} {}", id, message),
        }
        self.set_status(id, status);
        self.publish(id, message, event);
    }

    fn set_status(&self, id: Uuid, status: JobStatus) {
        // The spawned task may run before the entry is inserted; the map
        // lock held by the requester makes this wait for it.
        if let Ok(mut jobs) = self.jobs.lock() {
            let finished = status.is_finished();
            match jobs.get_mut(&id) {
                Some(entry) if !entry.info.status.is_finished() => {
                    if finished {
                        entry.info.finished_at = Some(Utc::now());
                    }
                    entry.info.status = status;
                }
                _ => return,
            }
            if finished {
                prune_finished(&mut jobs, self.retention);
            }
        }
    }

    fn publish(&self, id: Uuid, message: String, event: JobEvent) {
        self.pipeline.hub().publish(Notification::job(id.to_string(), message, event));
    }

    fn lock_jobs(&self) -> Result<MutexGuard<'_, HashMap<Uuid, JobEntry>>> {
        self.jobs
            .lock()
            .map_err(|_| DropsortError::Config("Job table lock poisoned".to_string()))
    }
}

fn relocate_batch(
    pipeline: &Pipeline,
    items: &[RelocationItem],
    id: Uuid,
    cancel: &CancellationToken,
) -> Result<JobOutcome> {
    let report = pipeline.relocate(items, &id.to_string(), cancel)?;
    let cancelled = report.cancelled;
    let summary = serde_json::to_value(report)?;
    if cancelled {
        Ok(JobOutcome::Cancelled(Some(summary)))
    } else {
        Ok(JobOutcome::Completed(summary))
    }
}

/// Drop the oldest finished jobs beyond `keep`
fn prune_finished(jobs: &mut HashMap<Uuid, JobEntry>, keep: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .values()
        .filter_map(|e| e.info.finished_at.map(|at| (at, e.info.id)))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    debug!("Pruned {} finished jobs", excess);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;
    use std::time::Duration;

    fn entry(status: JobStatus, finished_secs_ago: Option<i64>) -> JobEntry {
        let now = Utc::now();
        JobEntry {
            info: JobInfo {
                id: Uuid::new_v4(),
                kind: JobKind::Synchronize,
                status,
                created_at: now - chrono::Duration::seconds(3600),
                finished_at: finished_secs_ago.map(|s| now - chrono::Duration::seconds(s)),
            },
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let shared = token.clone();
        assert!(token.check().is_ok());
        shared.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(DropsortError::Cancelled)));
    }

    #[test]
    fn test_job_status_serialization() {
        let status = JobStatus::Failed { error: "boom".into() };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(status.is_finished());
        assert!(!JobStatus::Running.is_finished());

        let cancelled = JobStatus::Cancelled { summary: None };
        assert_eq!(serde_json::to_value(&cancelled).unwrap(), serde_json::json!({"status": "cancelled"}));
    }

    #[test]
    fn test_prune_keeps_newest_finished_and_all_active() {
        let completed = || JobStatus::Completed { summary: serde_json::json!({}) };
        let oldest = entry(completed(), Some(30));
        let middle = entry(JobStatus::Failed { error: "boom".into() }, Some(20));
        let newest = entry(completed(), Some(10));
        let running = entry(JobStatus::Running, None);
        let ids = [oldest.info.id, middle.info.id, newest.info.id, running.info.id];

        let mut jobs: HashMap<Uuid, JobEntry> = [oldest, middle, newest, running]
            .into_iter()
            .map(|e| (e.info.id, e))
            .collect();
        prune_finished(&mut jobs, 2);

        assert_eq!(jobs.len(), 3);
        assert!(!jobs.contains_key(&ids[0]));
        assert!(ids[1..].iter().all(|id| jobs.contains_key(id)));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        let pipeline = Pipeline::new(AppConfig::rooted_at(dir.path()), Database::in_memory().unwrap()).unwrap();
        let dispatcher = JobDispatcher::with_retention(Arc::new(pipeline), 2);

        let mut last = None;
        for _ in 0..4 {
            let handle = dispatcher.request_synchronize().unwrap();
            dispatcher.wait(handle.id).await.unwrap();
            last = Some(handle.id);
        }

        let jobs = dispatcher.jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, last.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_relocation_keeps_its_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        let pipeline = Pipeline::new(AppConfig::rooted_at(dir.path()), Database::in_memory().unwrap()).unwrap();
        let dispatcher = JobDispatcher::new(Arc::new(pipeline));

        let items = vec![RelocationItem::new("a", "Invoices"), RelocationItem::new("b", "Photos")];
        let mut jobs = dispatcher.lock_jobs().unwrap();
        let pipeline = dispatcher.pipeline().clone();
        let handle = dispatcher.spawn(&mut jobs, JobKind::Relocate, move |id, cancel| {
            // Hold the batch until the cancel request lands
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            relocate_batch(&pipeline, &items, id, cancel)
        });
        drop(jobs);

        assert!(dispatcher.cancel(handle.id).unwrap());
        let info = dispatcher.wait(handle.id).await.unwrap().unwrap();
        match info.status {
            JobStatus::Cancelled { summary: Some(summary) } => {
                assert_eq!(summary["cancelled"], true);
                assert_eq!(summary["moved"], 0);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(!dispatcher.cancel(handle.id).unwrap());
    }

    #[test]
    fn test_cancelled_error_has_no_summary() {
        assert_eq!(
            JobOutcome::into_status(Err(DropsortError::Cancelled)),
            JobStatus::Cancelled { summary: None }
        );
        assert!(matches!(
            JobOutcome::into_status(Err(DropsortError::NotFound("x".into()))),
            JobStatus::Failed { .. }
        ));
    }
}
