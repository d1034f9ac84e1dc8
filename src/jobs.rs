use crate::config::WorkerSettings;
use crate::models::AccessRequest;
use crate::services::access_recorder::AccessRecorder;
use crate::store::LinkStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Background job types
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Write one access log entry
    RecordAccess(AccessRequest),
    /// Atomically add `delta` to a link's click counter
    IncrementClicks { shortlink_id: Uuid, delta: i64 },
}

/// Background worker configuration
#[derive(Clone)]
pub struct WorkerConfig {
    /// Maximum retries for failed access log writes
    pub max_retries: u32,
    /// Backoff duration between retries
    pub retry_delay_ms: u64,
    /// Jobs in flight at once
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 200,
            concurrency: 8,
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
            concurrency: settings.concurrency,
        }
    }
}

/// Shared by every in-flight job
struct JobRunner {
    store: Arc<dyn LinkStore>,
    recorder: AccessRecorder,
    config: WorkerConfig,
}

/// Background job worker
pub struct Worker {
    runner: Arc<JobRunner>,
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl Worker {
    /// Create a new worker
    pub fn new(
        store: Arc<dyn LinkStore>,
        recorder: AccessRecorder,
        receiver: mpsc::UnboundedReceiver<Job>,
    ) -> Self {
        Self {
            runner: Arc::new(JobRunner {
                store,
                recorder,
                config: WorkerConfig::default(),
            }),
            receiver,
        }
    }

    /// Set worker configuration
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.runner = Arc::new(JobRunner {
            store: self.runner.store.clone(),
            recorder: self.runner.recorder.clone(),
            config,
        });
        self
    }

    /// Run the worker until every sender is dropped. Up to `concurrency`
    /// jobs run at once, so a slow geo lookup never holds up click counting.
    /// In-flight jobs are awaited before returning.
    pub async fn run(mut self) {
        let concurrency = self.runner.config.concurrency.max(1);
        info!(concurrency, "Background worker started");

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();

        while let Some(job) = self.receiver.recv().await {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker semaphore closed: {}", e);
                    break;
                }
            };

            let runner = self.runner.clone();
            in_flight.spawn(async move {
                runner.process_job(job).await;
                drop(permit);
            });

            while let Some(result) = in_flight.try_join_next() {
                log_join_result(result);
            }
        }

        while let Some(result) = in_flight.join_next().await {
            log_join_result(result);
        }

        info!("Background worker stopped");
    }

    /// Process whatever is queued right now, one at a time, without waiting for more.
    pub async fn run_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(job) = self.receiver.try_recv() {
            self.runner.process_job(job).await;
            processed += 1;
        }
        processed
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Job task failed: {:?}", e);
    }
}

impl JobRunner {
    async fn process_job(&self, job: Job) {
        match job {
            Job::RecordAccess(request) => self.record_access(&request).await,
            Job::IncrementClicks { shortlink_id, delta } => {
                // Not idempotent: a failure after commit must not be replayed
                if let Err(e) = self.store.increment_clicks(shortlink_id, delta).await {
                    warn!(shortlink_id = %shortlink_id, delta, "Click increment dropped: {}", e);
                }
            }
        }
    }

    /// Enrich once, then retry the write of that same entry
    async fn record_access(&self, request: &AccessRequest) {
        let entry = self.recorder.prepare(request).await;
        let mut retries = 0;

        loop {
            match self.recorder.persist(&entry).await {
                Ok(()) => {
                    debug!(
                        shortlink_id = %entry.shortlink_id,
                        device = entry.device_type.as_str(),
                        "Access recorded"
                    );
                    break;
                }
                Err(e) if retries < self.config.max_retries => {
                    retries += 1;
                    let delay = std::time::Duration::from_millis(self.config.retry_delay_ms);
                    warn!(
                        "Access log write failed (attempt {}/{}), retrying in {:?}: {}",
                        retries, self.config.max_retries, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Dropped: the redirect outcome was already returned
                    error!(
                        entry_id = %entry.id,
                        "Access log write failed after {} retries: {}",
                        self.config.max_retries, e
                    );
                    break;
                }
            }
        }
    }
}

/// Job sender - used to submit jobs to the worker
#[derive(Clone)]
pub struct JobSender {
    sender: mpsc::UnboundedSender<Job>,
}

impl JobSender {
    /// Create a new job sender
    pub fn new(sender: mpsc::UnboundedSender<Job>) -> Self {
        Self { sender }
    }

    /// Submit a job to be processed asynchronously. Never blocks or fails the caller.
    pub fn send(&self, job: Job) {
        if self.sender.send(job).is_err() {
            error!("Failed to send job to worker - channel may be closed");
        }
    }

    pub fn record_access(&self, request: AccessRequest) {
        self.send(Job::RecordAccess(request));
    }

    pub fn increment_clicks(&self, shortlink_id: Uuid, delta: i64) {
        self.send(Job::IncrementClicks {
            shortlink_id,
            delta,
        });
    }
}

/// Create a new job sender and receiver pair
pub fn create_job_channel() -> (JobSender, mpsc::UnboundedReceiver<Job>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (JobSender::new(sender), receiver)
}
