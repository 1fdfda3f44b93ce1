//! Single-batch job lifecycle: queued/running/paused/cancelled/completed,
//! worker-pool concurrency, pause/resume without interrupting in-flight
//! jobs, and a bounded retry list.
//!
//! Generalized from the teacher's `llm::queue::LlmQueue::process_all_parallel`
//! (work-stealing `VecDeque` behind a `Mutex`, `std::thread::scope` worker
//! pool, atomic counters, consecutive-failure circuit breaker) into a full
//! state machine with pause/resume/cancel/retry, and from
//! `tasks::{TaskProgress, TaskUpdate}` for the progress-event vocabulary.

use crate::error::{AppError, ErrorKind};
use crate::model::{BatchPhase, DuplicateStatistics, Job, JobStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One result a processor hands back for a completed job.
pub enum ProcessOutcome {
    Success,
    DuplicateSkipped,
    DuplicateUpdated,
    DuplicateReplaced,
    Failure(AppError),
}

/// Progress/lifecycle events a `JobQueue` emits. Mirrors the teacher's
/// `TaskUpdate` enum, scoped per-batch.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { total: usize },
    Progress {
        processed: usize,
        failed: usize,
        total: usize,
        current_job: Option<String>,
    },
    Completed { message: String },
    Cancelled,
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct FailedJobDetail {
    pub job_id: String,
    pub filename: String,
    pub error_kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

pub struct JobQueueStatus {
    pub total_jobs: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub phase: BatchPhase,
    pub current_job: Option<String>,
    pub failed_job_details: Vec<FailedJobDetail>,
    pub duplicate_statistics: DuplicateStatistics,
    pub start_time: Option<Instant>,
    pub progress_percent: u8,
    /// Estimated remaining duration, extrapolated from the average time per
    /// completed job; `None` until at least one job has completed.
    pub eta: Option<Duration>,
}

struct SharedState {
    pending: VecDeque<Job>,
    failed: Vec<Job>,
    duplicate_statistics: DuplicateStatistics,
}

/// Manages exactly one batch's jobs end to end.
pub struct JobQueue {
    shared: Arc<Mutex<SharedState>>,
    processed: Arc<AtomicUsize>,
    failed_count: Arc<AtomicUsize>,
    total: usize,
    phase: Arc<Mutex<BatchPhase>>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    current_job: Arc<Mutex<Option<String>>>,
    max_retry_attempts: u32,
    start_time: Arc<Mutex<Option<Instant>>>,
}

impl JobQueue {
    pub fn new(jobs: Vec<Job>, max_retry_attempts: u32) -> anyhow::Result<Self> {
        for job in &jobs {
            job.payload
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid job payload: {e}"))?;
        }
        let total = jobs.len();
        Ok(Self {
            shared: Arc::new(Mutex::new(SharedState {
                pending: jobs.into(),
                failed: Vec::new(),
                duplicate_statistics: DuplicateStatistics::default(),
            })),
            processed: Arc::new(AtomicUsize::new(0)),
            failed_count: Arc::new(AtomicUsize::new(0)),
            total,
            phase: Arc::new(Mutex::new(BatchPhase::Queued)),
            paused: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            current_job: Arc::new(Mutex::new(None)),
            max_retry_attempts,
            start_time: Arc::new(Mutex::new(None)),
        })
    }

    pub fn phase(&self) -> BatchPhase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: BatchPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    /// Runs every pending job through `processor`, `concurrency` workers at
    /// a time, emitting events via `on_event`. Blocks until the batch
    /// reaches a terminal phase (or is paused).
    pub fn start_processing(
        &self,
        concurrency: usize,
        processor: impl Fn(&Job) -> ProcessOutcome + Send + Sync,
        on_event: impl Fn(BatchEvent) + Send + Sync,
    ) {
        self.set_phase(BatchPhase::Running);
        *self.start_time.lock().unwrap() = Some(Instant::now());
        on_event(BatchEvent::Started { total: self.total });

        let concurrency = concurrency.max(1);
        std::thread::scope(|scope| {
            for _ in 0..concurrency {
                scope.spawn(|| self.worker_loop(&processor, &on_event));
            }
        });

        if self.cancelled.load(Ordering::SeqCst) {
            self.set_phase(BatchPhase::Cancelled);
            on_event(BatchEvent::Cancelled);
            return;
        }

        let failed = self.failed_count.load(Ordering::SeqCst);
        if failed > 0 && self.processed.load(Ordering::SeqCst) == 0 {
            self.set_phase(BatchPhase::Failed);
            on_event(BatchEvent::Failed {
                error: format!("all {failed} jobs failed"),
            });
        } else {
            self.set_phase(BatchPhase::Completed);
            on_event(BatchEvent::Completed {
                message: format!(
                    "processed {} of {} jobs ({} failed)",
                    self.processed.load(Ordering::SeqCst),
                    self.total,
                    failed
                ),
            });
        }
    }

    fn worker_loop(
        &self,
        processor: &(impl Fn(&Job) -> ProcessOutcome + Send + Sync),
        on_event: &(impl Fn(BatchEvent) + Send + Sync),
    ) {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }

            let mut job = {
                let mut shared = self.shared.lock().unwrap();
                match shared.pending.pop_front() {
                    Some(job) => job,
                    None => return,
                }
            };

            job.status = JobStatus::Running;
            *self.current_job.lock().unwrap() = Some(job.payload.filename.clone());

            let outcome = processor(&job);

            match outcome {
                ProcessOutcome::Success => {
                    job.status = JobStatus::Succeeded;
                    self.processed.fetch_add(1, Ordering::SeqCst);
                }
                ProcessOutcome::DuplicateSkipped => {
                    job.status = JobStatus::Succeeded;
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    self.shared.lock().unwrap().duplicate_statistics.skipped_images += 1;
                }
                ProcessOutcome::DuplicateUpdated => {
                    job.status = JobStatus::Succeeded;
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    self.shared.lock().unwrap().duplicate_statistics.updated_images += 1;
                }
                ProcessOutcome::DuplicateReplaced => {
                    job.status = JobStatus::Succeeded;
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    self.shared.lock().unwrap().duplicate_statistics.replaced_images += 1;
                }
                ProcessOutcome::Failure(err) => {
                    job.status = JobStatus::Failed;
                    job.last_error_kind = Some(err.kind());
                    job.last_error = Some(err.to_string());
                    self.failed_count.fetch_add(1, Ordering::SeqCst);
                    self.shared.lock().unwrap().failed.push(job.clone());
                }
            }

            on_event(BatchEvent::Progress {
                processed: self.processed.load(Ordering::SeqCst),
                failed: self.failed_count.load(Ordering::SeqCst),
                total: self.total,
                current_job: Some(job.payload.filename.clone()),
            });
        }
    }

    /// Transitions running -> paused. No in-flight job is interrupted.
    pub fn pause(&self) -> bool {
        if self.phase() != BatchPhase::Running {
            return false;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.set_phase(BatchPhase::Paused);
        true
    }

    pub fn resume(&self) -> bool {
        if self.phase() != BatchPhase::Paused {
            return false;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.set_phase(BatchPhase::Running);
        true
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Moves failed jobs back onto the pending queue, bumping their
    /// attempt count, up to `max_retry_attempts`. Only jobs whose last
    /// error kind is retryable (spec §7: only `Upstream503`) are eligible;
    /// `InputInvalid`, `UpstreamPayloadRejected`, and the rest are never
    /// retried and remain in the failed list.
    pub fn retry_failed_jobs(&self) -> usize {
        let mut shared = self.shared.lock().unwrap();
        let max_retry_attempts = self.max_retry_attempts;
        let mut retried = 0;
        let still_failed: Vec<Job> = std::mem::take(&mut shared.failed)
            .into_iter()
            .filter_map(|mut job| {
                let retryable = job
                    .last_error_kind
                    .map(ErrorKind::retryable)
                    .unwrap_or(false);
                if retryable && job.attempts < max_retry_attempts {
                    job.attempts += 1;
                    job.status = JobStatus::Pending;
                    shared.pending.push_back(job);
                    retried += 1;
                    None
                } else {
                    Some(job)
                }
            })
            .collect();
        shared.failed = still_failed;
        self.failed_count.fetch_sub(retried.min(self.failed_count.load(Ordering::SeqCst)), Ordering::SeqCst);
        retried
    }

    pub fn status(&self) -> JobQueueStatus {
        let shared = self.shared.lock().unwrap();
        let processed_count = self.processed.load(Ordering::SeqCst);
        let progress_percent = if self.total == 0 {
            0
        } else {
            ((processed_count.min(self.total) * 100) / self.total) as u8
        };
        let start_time = *self.start_time.lock().unwrap();
        let eta = start_time.and_then(|start| {
            if processed_count == 0 || processed_count >= self.total {
                None
            } else {
                let per_job = start.elapsed() / processed_count as u32;
                Some(per_job * (self.total - processed_count) as u32)
            }
        });

        JobQueueStatus {
            total_jobs: self.total,
            processed_count,
            failed_count: self.failed_count.load(Ordering::SeqCst),
            phase: self.phase(),
            current_job: self.current_job.lock().unwrap().clone(),
            failed_job_details: shared
                .failed
                .iter()
                .map(|job| FailedJobDetail {
                    job_id: job.id.clone(),
                    filename: job.payload.filename.clone(),
                    error_kind: job.last_error_kind.unwrap_or(ErrorKind::StoreWrite),
                    message: job.last_error.clone().unwrap_or_default(),
                    attempts: job.attempts,
                })
                .collect(),
            duplicate_statistics: shared.duplicate_statistics,
            start_time,
            progress_percent,
            eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobPayload;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    fn sample_job(id: &str) -> Job {
        Job::new(
            id,
            JobPayload {
                source_image_key: id.to_string(),
                fetch_url: format!("https://host/{id}.jpg"),
                filename: format!("{id}.jpg"),
                album_key: "album-1".to_string(),
                album_name: "Album".to_string(),
                album_path: "/Album".to_string(),
                album_hierarchy: vec!["Album".to_string()],
            },
        )
    }

    #[test]
    fn happy_path_processes_all_jobs() {
        let jobs = (0..3).map(|i| sample_job(&format!("k{i}"))).collect();
        let queue = JobQueue::new(jobs, 3).unwrap();
        queue.start_processing(2, |_job| ProcessOutcome::Success, |_event| {});
        let status = queue.status();
        assert_eq!(status.processed_count, 3);
        assert_eq!(status.failed_count, 0);
        assert_eq!(status.phase, BatchPhase::Completed);
    }

    #[test]
    fn failed_jobs_are_retryable_up_to_cap() {
        let jobs = vec![sample_job("k0")];
        let queue = JobQueue::new(jobs, 2).unwrap();
        queue.start_processing(
            1,
            |_job| ProcessOutcome::Failure(AppError::Upstream503("boom".to_string())),
            |_event| {},
        );
        assert_eq!(queue.status().failed_count, 1);

        let retried = queue.retry_failed_jobs();
        assert_eq!(retried, 1);
        queue.start_processing(
            1,
            |_job| ProcessOutcome::Failure(AppError::Upstream503("boom again".to_string())),
            |_event| {},
        );
        assert_eq!(queue.status().failed_count, 1);
    }

    #[test]
    fn non_retryable_failures_are_never_retried() {
        let jobs = vec![sample_job("k0")];
        let queue = JobQueue::new(jobs, 5).unwrap();
        queue.start_processing(
            1,
            |_job| ProcessOutcome::Failure(AppError::InputInvalid("bad payload".to_string())),
            |_event| {},
        );
        assert_eq!(queue.status().failed_count, 1);

        let retried = queue.retry_failed_jobs();
        assert_eq!(retried, 0);
        assert_eq!(queue.status().failed_count, 1);
        assert_eq!(
            queue.status().failed_job_details[0].error_kind,
            ErrorKind::InputInvalid
        );
    }

    #[test]
    fn cancel_during_processing_stops_remaining_jobs() {
        let jobs = (0..5).map(|i| sample_job(&format!("k{i}"))).collect();
        let queue = Arc::new(JobQueue::new(jobs, 3).unwrap());
        let seen = Arc::new(StdAtomicUsize::new(0));

        let queue_for_cancel = queue.clone();
        let seen_clone = seen.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            queue_for_cancel.cancel();
            let _ = seen_clone;
        });

        queue.start_processing(
            1,
            |_job| {
                std::thread::sleep(std::time::Duration::from_millis(15));
                seen.fetch_add(1, Ordering::SeqCst);
                ProcessOutcome::Success
            },
            |_event| {},
        );

        assert_eq!(queue.status().phase, BatchPhase::Cancelled);
        assert!(seen.load(Ordering::SeqCst) < 5);
    }

    #[test]
    fn batch_counters_never_exceed_total() {
        let jobs = (0..4).map(|i| sample_job(&format!("k{i}"))).collect();
        let queue = JobQueue::new(jobs, 1).unwrap();
        queue.start_processing(
            2,
            |job| {
                if job.id.ends_with('1') {
                    ProcessOutcome::Failure(AppError::StoreWrite("nope".to_string()))
                } else {
                    ProcessOutcome::Success
                }
            },
            |_event| {},
        );
        let status = queue.status();
        assert!(status.processed_count + status.failed_count <= status.total_jobs);
    }
}
