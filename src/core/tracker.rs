use crate::adapters::service::FineTuningService;
use crate::core::error::{TrackerError, TrackerResult};
use crate::core::job::{Event, FileObject, JobRecord, JobRequest, JobStatus, Message};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use std::path::Path;
use tokio::time::{sleep, Duration, Instant};

/// How often, and for how long, to poll a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// Factor applied to the interval after each poll; 1.0 keeps it fixed.
    pub backoff: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout, backoff: 1.0, max_interval: interval }
    }

    pub fn with_backoff(mut self, backoff: f64, max_interval: Duration) -> Self {
        self.backoff = backoff.max(1.0);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Grows the interval by the backoff factor; a product too large for a
    /// `Duration` saturates at `max_interval`.
    fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff)
            .map_or(self.max_interval, |next| next.min(self.max_interval))
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(10), Duration::from_secs(60 * 60))
    }
}

/// Fails unless the job succeeded and names its fine-tuned model.
pub fn extract_result_model(job: &JobRecord) -> TrackerResult<String> {
    match (&job.status, &job.fine_tuned_model) {
        (JobStatus::Succeeded, Some(model)) => Ok(model.clone()),
        _ => Err(TrackerError::NotReady {
            job_id: job.id.clone(),
            status: job.status,
        }),
    }
}

/// Reorders a newest-first event listing into the order the events happened.
pub fn chronological(mut events: Vec<Event>) -> Vec<Event> {
    events.reverse();
    events
}

pub struct JobTracker<S: FineTuningService> {
    service: S,
}

impl<S: FineTuningService> JobTracker<S> {
    pub fn new(service: S) -> JobTracker<S> {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn upload(&self, file_path: &Path, purpose: &str) -> TrackerResult<FileObject> {
        info!("Uploading {:?} with purpose {}", file_path, purpose);
        self.service.upload_file(file_path, purpose).await
    }

    pub async fn submit(&self, request: &JobRequest) -> TrackerResult<JobRecord> {
        let job = self.service.create_job(request).await?;
        info!("Fine-tuning job {} created. Status: {}", job.id, job.status);
        Ok(job)
    }

    pub async fn poll(&self, job_id: &str) -> TrackerResult<JobRecord> {
        let job = self.service.retrieve_job(job_id).await?;
        debug!("Job {} status: {}", job.id, job.status);
        Ok(job)
    }

    pub async fn await_terminal(
        &self,
        job_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> TrackerResult<JobRecord> {
        self.await_terminal_with(job_id, &PollPolicy::fixed(poll_interval, timeout), |_| {})
            .await
    }

    /// Polls until the job is terminal, handing every observed record to `on_poll`.
    ///
    /// A timeout too large to land on the clock (such as `Duration::MAX`) means
    /// no deadline.
    ///
    /// A record whose status ranks below one already observed is a stale read;
    /// it is logged and skipped so `on_poll` never sees the lifecycle go backwards.
    pub async fn await_terminal_with<F>(
        &self,
        job_id: &str,
        policy: &PollPolicy,
        mut on_poll: F,
    ) -> TrackerResult<JobRecord>
    where
        F: FnMut(&JobRecord),
    {
        let deadline = Instant::now().checked_add(policy.timeout);
        let mut delay = policy.interval;
        let mut last_status: Option<JobStatus> = None;

        loop {
            let job = self.poll(job_id).await?;
            match last_status {
                Some(seen) if job.status.rank() < seen.rank() => {
                    warn!("Ignoring stale status {} for job {} (already saw {})", job.status, job_id, seen);
                }
                _ => {
                    if last_status != Some(job.status) {
                        info!("Job {} is {}", job_id, job.status);
                    }
                    last_status = Some(job.status);
                    on_poll(&job);
                    if job.is_terminal() {
                        return Ok(job);
                    }
                }
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(TrackerError::Timeout {
                        job_id: job_id.to_string(),
                        timeout: policy.timeout,
                        last_status: last_status.unwrap_or(job.status),
                    });
                }
                Some(deadline) => delay.min(deadline - now),
                None => delay,
            };
            sleep(pause).await;
            delay = policy.next_interval(delay);
        }
    }

    pub async fn cancel(&self, job_id: &str) -> TrackerResult<JobRecord> {
        let job = self.service.cancel_job(job_id).await?;
        info!("Cancellation requested for job {}. Status: {}", job.id, job.status);
        Ok(job)
    }

    /// Streams a job's events newest first, one service page at a time.
    ///
    /// Nothing is fetched until the stream is polled; calling this again
    /// starts over from `cursor`.
    pub fn list_events<'a>(
        &'a self,
        job_id: &'a str,
        limit: Option<u32>,
        cursor: Option<String>,
    ) -> impl Stream<Item = TrackerResult<Event>> + 'a {
        stream::try_unfold(Some(cursor), move |next| self.fetch_page(job_id, limit, next))
            .map_ok(|events| stream::iter(events.into_iter().map(Ok::<Event, TrackerError>)))
            .try_flatten()
    }

    async fn fetch_page(
        &self,
        job_id: &str,
        limit: Option<u32>,
        next: Option<Option<String>>,
    ) -> TrackerResult<Option<(Vec<Event>, Option<Option<String>>)>> {
        let Some(after) = next else {
            return Ok(None);
        };
        let page = self.service.list_events(job_id, limit, after).await?;
        debug!("Fetched {} events for job {} (has_more: {})", page.data.len(), job_id, page.has_more);
        let next = if page.has_more {
            page.data.last().map(|event| Some(event.id.clone()))
        } else {
            None
        };
        Ok(Some((page.data, next)))
    }

    /// Drains [`list_events`](Self::list_events) into a newest-first vector.
    pub async fn collect_events(&self, job_id: &str, limit: Option<u32>) -> TrackerResult<Vec<Event>> {
        self.list_events(job_id, limit, None).try_collect().await
    }

    /// Returns at most `limit` events, newest first, starting after `cursor`.
    ///
    /// Only as many pages as needed to fill `limit` are fetched.
    pub async fn recent_events(
        &self,
        job_id: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> TrackerResult<Vec<Event>> {
        self.list_events(job_id, Some(limit), cursor)
            .take(limit as usize)
            .try_collect()
            .await
    }

    pub async fn infer(&self, model: &str, messages: Vec<Message>) -> TrackerResult<String> {
        info!("Sending {} messages to {}", messages.len(), model);
        self.service.chat(model, messages).await
    }
}
