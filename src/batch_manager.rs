//! Multi-batch coordinator: owns the shared `RateLimiter`, enforces
//! `maxConcurrentBatches`, and evicts finished batches after a grace
//! period.
//!
//! Generalized from the teacher's `tasks::manager::BackgroundTaskManager`
//! (a `HashMap<TaskId, Task>` table polled for update drains) — here the
//! table holds `JobQueue`-backed batches instead of single background
//! tasks, and owns a rate limiter all batches' workers acquire through.

use crate::config::{BatchConfig, RateLimitConfig};
use crate::error::AppError;
use crate::job_queue::{BatchEvent, JobQueue, JobQueueStatus, ProcessOutcome};
use crate::model::{BatchPhase, Job};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn sized_rate_limiter_config(config: &RateLimitConfig) -> RateLimiterConfig {
    RateLimiterConfig {
        max_tokens: (config.global_rate_per_minute as f64 / 6.0).max(10.0),
        refill_rate_per_sec: config.global_rate_per_minute as f64 / 60.0,
        max_concurrent: config.max_concurrent_requests,
    }
}

struct ManagedBatch {
    name: String,
    album_key: String,
    created_at: DateTime<Utc>,
    queue: Arc<JobQueue>,
    evict_after: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone)]
pub struct BatchStatusView {
    pub batch_id: String,
    pub name: String,
    pub album_key: String,
    pub created_at: DateTime<Utc>,
    pub total_jobs: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub phase: BatchPhase,
    pub current_job: Option<String>,
    pub progress_percent: u8,
    pub eta: Option<Duration>,
}

pub struct BatchManager {
    rate_limiter: Arc<RateLimiter>,
    batches: Mutex<HashMap<String, ManagedBatch>>,
    batch_config: Mutex<BatchConfig>,
    next_id: Mutex<u64>,
}

impl BatchManager {
    pub fn new(rate_limit_config: RateLimitConfig, batch_config: BatchConfig) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(sized_rate_limiter_config(&rate_limit_config))),
            batches: Mutex::new(HashMap::new()),
            batch_config: Mutex::new(batch_config),
            next_id: Mutex::new(0),
        }
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    fn new_batch_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("batch-{next}")
    }

    fn active_batch_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap()
            .values()
            .filter(|b| !b.queue.phase().is_terminal())
            .count()
    }

    /// Creates a batch's `JobQueue` and registers it, without starting it
    /// (spec §4.7: `createBatch` rejects once `maxConcurrentBatches` is
    /// reached, independent of `startBatch`).
    pub fn create_batch(
        &self,
        jobs: Vec<Job>,
        name: impl Into<String>,
        album_key: impl Into<String>,
    ) -> Result<String> {
        let max_concurrent_batches = self.batch_config.lock().unwrap().max_concurrent_batches;
        if self.active_batch_count() >= max_concurrent_batches {
            bail!("max concurrent batches ({max_concurrent_batches}) reached");
        }
        let max_retry_attempts = self.batch_config.lock().unwrap().max_retry_attempts;
        let queue = Arc::new(JobQueue::new(jobs, max_retry_attempts)?);
        let batch_id = self.new_batch_id();
        self.batches.lock().unwrap().insert(
            batch_id.clone(),
            ManagedBatch {
                name: name.into(),
                album_key: album_key.into(),
                created_at: Utc::now(),
                queue,
                evict_after: Mutex::new(None),
            },
        );
        Ok(batch_id)
    }

    /// Starts processing a previously created batch. `processor` is run on
    /// the worker pool, wrapped so every call passes through the shared
    /// rate limiter first (spec §4.7: "each processor call passes through
    /// `rateLimiter.execute(...)`").
    pub fn start_batch(
        &self,
        batch_id: &str,
        concurrency: usize,
        processor: impl Fn(&Job) -> ProcessOutcome + Send + Sync,
        on_event: impl Fn(&str, BatchEvent) + Send + Sync,
    ) -> Result<()> {
        let queue = {
            let batches = self.batches.lock().unwrap();
            let batch = batches
                .get(batch_id)
                .ok_or_else(|| anyhow::anyhow!("unknown batch {batch_id}"))?;
            batch.queue.clone()
        };
        let rate_limiter = self.rate_limiter.clone();

        let wrapped_processor = |job: &Job| -> ProcessOutcome {
            match rate_limiter.execute(|| processor(job)) {
                Some(outcome) => outcome,
                None => ProcessOutcome::Failure(AppError::Cancelled),
            }
        };

        queue.start_processing(concurrency, wrapped_processor, |event| {
            on_event(batch_id, event)
        });

        self.schedule_eviction(batch_id);
        Ok(())
    }

    fn schedule_eviction(&self, batch_id: &str) {
        let eviction_delay = Duration::from_secs(self.batch_config.lock().unwrap().eviction_delay_secs);
        let batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.get(batch_id) {
            *batch.evict_after.lock().unwrap() = Some(Instant::now() + eviction_delay);
        }
    }

    /// Removes batches whose terminal phase's grace period has elapsed.
    /// Call periodically (e.g. from a status-polling loop).
    pub fn evict_expired(&self) {
        let mut batches = self.batches.lock().unwrap();
        let now = Instant::now();
        batches.retain(|_, batch| match *batch.evict_after.lock().unwrap() {
            Some(deadline) => now < deadline,
            None => true,
        });
    }

    pub fn pause(&self, batch_id: &str) -> Result<bool> {
        self.with_batch(batch_id, |batch| batch.queue.pause())
    }

    pub fn resume(&self, batch_id: &str) -> Result<bool> {
        self.with_batch(batch_id, |batch| batch.queue.resume())
    }

    pub fn cancel(&self, batch_id: &str) -> Result<()> {
        self.with_batch(batch_id, |batch| batch.queue.cancel())
    }

    pub fn cancel_all_batches(&self) {
        let batches = self.batches.lock().unwrap();
        for batch in batches.values() {
            batch.queue.cancel();
        }
        drop(batches);
        self.rate_limiter.clear_queue();
    }

    pub fn retry_failed_jobs(&self, batch_id: &str) -> Result<usize> {
        self.with_batch(batch_id, |batch| batch.queue.retry_failed_jobs())
    }

    pub fn update_config(&self, rate_limit_config: RateLimitConfig, batch_config: BatchConfig) {
        self.rate_limiter
            .update_config(sized_rate_limiter_config(&rate_limit_config));
        *self.batch_config.lock().unwrap() = batch_config;
    }

    fn with_batch<T>(&self, batch_id: &str, f: impl FnOnce(&ManagedBatch) -> T) -> Result<T> {
        let batches = self.batches.lock().unwrap();
        let batch = batches
            .get(batch_id)
            .ok_or_else(|| anyhow::anyhow!("unknown batch {batch_id}"))?;
        Ok(f(batch))
    }

    pub fn batch_status(&self, batch_id: &str) -> Result<BatchStatusView> {
        self.with_batch(batch_id, |batch| to_view(batch_id, batch, batch.queue.status()))
    }

    pub fn all_statuses(&self) -> Vec<BatchStatusView> {
        let batches = self.batches.lock().unwrap();
        batches
            .iter()
            .map(|(id, batch)| to_view(id, batch, batch.queue.status()))
            .collect()
    }
}

fn to_view(batch_id: &str, batch: &ManagedBatch, status: JobQueueStatus) -> BatchStatusView {
    BatchStatusView {
        batch_id: batch_id.to_string(),
        name: batch.name.clone(),
        album_key: batch.album_key.clone(),
        created_at: batch.created_at,
        total_jobs: status.total_jobs,
        processed_count: status.processed_count,
        failed_count: status.failed_count,
        phase: status.phase,
        current_job: status.current_job,
        progress_percent: status.progress_percent,
        eta: status.eta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobPayload;

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

    fn fast_rate_limit() -> RateLimitConfig {
        RateLimitConfig {
            global_rate_per_minute: 6000,
            max_concurrent_requests: 4,
        }
    }

    #[test]
    fn create_batch_rejects_beyond_max_concurrent() {
        let manager = BatchManager::new(
            fast_rate_limit(),
            BatchConfig {
                max_concurrent_batches: 1,
                max_retry_attempts: 1,
                eviction_delay_secs: 30,
            },
        );
        manager
            .create_batch(vec![sample_job("k0")], "first", "album-1")
            .unwrap();
        let second = manager.create_batch(vec![sample_job("k1")], "second", "album-1");
        assert!(second.is_err());
    }

    #[test]
    fn start_batch_runs_jobs_through_rate_limiter() {
        let manager = BatchManager::new(
            fast_rate_limit(),
            BatchConfig {
                max_concurrent_batches: 2,
                max_retry_attempts: 1,
                eviction_delay_secs: 30,
            },
        );
        let batch_id = manager
            .create_batch(
                (0..3).map(|i| sample_job(&format!("k{i}"))).collect(),
                "batch",
                "album-1",
            )
            .unwrap();
        manager
            .start_batch(&batch_id, 2, |_job| ProcessOutcome::Success, |_id, _ev| {})
            .unwrap();
        let status = manager.batch_status(&batch_id).unwrap();
        assert_eq!(status.processed_count, 3);
        assert_eq!(status.phase, BatchPhase::Completed);
    }

    #[test]
    fn cancel_all_batches_marks_cancelled() {
        let manager = BatchManager::new(
            RateLimitConfig {
                global_rate_per_minute: 60,
                max_concurrent_requests: 1,
            },
            BatchConfig {
                max_concurrent_batches: 2,
                max_retry_attempts: 1,
                eviction_delay_secs: 30,
            },
        );
        let batch_id = manager
            .create_batch(
                (0..5).map(|i| sample_job(&format!("k{i}"))).collect(),
                "batch",
                "album-1",
            )
            .unwrap();
        let manager = Arc::new(manager);
        let manager_clone = manager.clone();
        let batch_id_clone = batch_id.clone();
        let handle = std::thread::spawn(move || {
            manager_clone
                .start_batch(&batch_id_clone, 1, |_job| ProcessOutcome::Success, |_id, _ev| {})
                .unwrap();
        });
        std::thread::sleep(Duration::from_millis(30));
        manager.cancel_all_batches();
        handle.join().unwrap();
        let status = manager.batch_status(&batch_id).unwrap();
        assert_eq!(status.phase, BatchPhase::Cancelled);
    }
}
