use super::service::FineTuningService;
use crate::core::error::{TrackerError, TrackerResult};
use crate::core::job::{Event, EventPage, FileObject, JobRecord, JobRequest, JobStatus, Message};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 20;
const TRAINING_STEPS: u32 = 3;

/// How a simulated job ends once it has finished running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedOutcome {
    Succeed,
    Fail,
}

/// An in-process stand-in for the hosted service.
///
/// Each non-terminal status lasts one `step` of tokio time, measured from job
/// creation, so jobs progress only while the clock moves.
pub struct SimulatedService {
    step: Duration,
    outcome: SimulatedOutcome,
    state: Mutex<SimulatedState>,
}

#[derive(Default)]
struct SimulatedState {
    files: HashMap<String, FileObject>,
    jobs: HashMap<String, SimulatedJob>,
}

struct SimulatedJob {
    record: JobRecord,
    started: Instant,
    stage: usize,
    cancelled: bool,
    training_tokens: u64,
    // Oldest first; listing reverses it.
    events: Vec<Event>,
}

impl SimulatedService {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            outcome: SimulatedOutcome::Succeed,
            state: Mutex::new(SimulatedState::default()),
        }
    }

    pub fn with_outcome(mut self, outcome: SimulatedOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Registers a file as if it had already been uploaded.
    pub fn with_existing_file(mut self, id: impl Into<String>, bytes: u64) -> Self {
        let id = id.into();
        let file = FileObject {
            id: id.clone(),
            bytes,
            filename: format!("{}.jsonl", id),
            purpose: crate::core::job::FINE_TUNE_PURPOSE.to_string(),
            created_at: Utc::now().timestamp(),
        };
        self.state.get_mut().files.insert(id, file);
        self
    }

    fn stage_for(&self, elapsed: Duration) -> usize {
        if self.step.is_zero() {
            return 3;
        }
        ((elapsed.as_nanos() / self.step.as_nanos()) as usize).min(3)
    }

    fn terminal_status(&self) -> JobStatus {
        match self.outcome {
            SimulatedOutcome::Succeed => JobStatus::Succeeded,
            SimulatedOutcome::Fail => JobStatus::Failed,
        }
    }

    /// Moves the job forward to the stage the clock says it has reached.
    fn refresh(&self, job: &mut SimulatedJob) {
        if job.cancelled {
            return;
        }
        let target = self.stage_for(job.started.elapsed());
        while job.stage < target {
            job.stage += 1;
            let at = job.record.created_at + (self.step.as_secs() * job.stage as u64) as i64;
            match job.stage {
                1 => {
                    job.record.status = JobStatus::Queued;
                    push_event(job, at, "info", "Files validated, moving job to queued state");
                }
                2 => {
                    job.record.status = JobStatus::Running;
                    push_event(job, at, "info", "Fine-tuning job started");
                    for step in 1..=TRAINING_STEPS {
                        let loss = 1.0 / (step as f64 + 1.0);
                        let message = format!("Step {}/{}: training loss={:.4}", step, TRAINING_STEPS, loss);
                        push_metrics(job, at, message, step, loss);
                    }
                }
                _ => self.finish(job, at),
            }
            debug!("Simulated job {} moved to {}", job.record.id, job.record.status);
        }
    }

    fn finish(&self, job: &mut SimulatedJob, at: i64) {
        let status = self.terminal_status();
        job.record.status = status;
        job.record.finished_at = Some(at);
        match status {
            JobStatus::Succeeded => {
                let suffix = job.record.suffix.clone().unwrap_or_default();
                let short_id = job.record.id.trim_start_matches("ftjob-").chars().take(8).collect::<String>();
                let model = format!("ft:{}:personal:{}:{}", job.record.model, suffix, short_id);
                job.record.fine_tuned_model = Some(model.clone());
                job.record.trained_tokens = Some(job.training_tokens);
                job.record.result_files = vec![format!("file-{}", Uuid::new_v4().simple())];
                push_event(job, at, "info", &format!("New fine-tuned model created: {}", model));
                push_event(job, at, "info", "The job has successfully completed");
            }
            _ => {
                job.record.error = Some(crate::core::job::JobError {
                    code: Some("training_failed".to_string()),
                    message: Some("Training diverged".to_string()),
                    param: None,
                });
                push_event(job, at, "error", "The job failed: Training diverged");
            }
        }
    }

    fn validate_file(&self, state: &SimulatedState, field: &str, id: &str) -> TrackerResult<u64> {
        state.files.get(id)
            .map(|file| file.bytes)
            .ok_or_else(|| TrackerError::Validation(format!("invalid {}: {}", field, id)))
    }
}

fn push_event(job: &mut SimulatedJob, created_at: i64, level: &str, message: &str) {
    job.events.push(Event {
        id: format!("ftevent-{}", Uuid::new_v4().simple()),
        created_at,
        level: level.to_string(),
        message: message.to_string(),
        kind: Some("message".to_string()),
        data: None,
    });
}

fn push_metrics(job: &mut SimulatedJob, created_at: i64, message: String, step: u32, loss: f64) {
    job.events.push(Event {
        id: format!("ftevent-{}", Uuid::new_v4().simple()),
        created_at,
        level: "info".to_string(),
        message,
        kind: Some("metrics".to_string()),
        data: Some(json!({"step": step, "train_loss": loss})),
    });
}

#[async_trait]
impl FineTuningService for SimulatedService {
    async fn upload_file(&self, file_path: &Path, purpose: &str) -> TrackerResult<FileObject> {
        let content = tokio::fs::read(file_path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", file_path))?;
        let filename = file_path.file_name()
            .and_then(|n| n.to_str())
            .context("Failed to get file name")?
            .to_string();

        let file = FileObject {
            id: format!("file-{}", Uuid::new_v4().simple()),
            bytes: content.len() as u64,
            filename,
            purpose: purpose.to_string(),
            created_at: Utc::now().timestamp(),
        };
        info!("Simulated upload of {} as {}", file.filename, file.id);
        self.state.lock().await.files.insert(file.id.clone(), file.clone());
        Ok(file)
    }

    async fn create_job(&self, request: &JobRequest) -> TrackerResult<JobRecord> {
        let mut state = self.state.lock().await;
        if request.model.is_empty() {
            return Err(TrackerError::Validation("model is required".to_string()));
        }
        let bytes = self.validate_file(&state, "training_file", &request.training_file)?;
        if let Some(validation_file) = &request.validation_file {
            self.validate_file(&state, "validation_file", validation_file)?;
        }

        let record = JobRecord {
            id: format!("ftjob-{}", Uuid::new_v4().simple()),
            status: JobStatus::ValidatingFiles,
            model: request.model.clone(),
            fine_tuned_model: None,
            trained_tokens: None,
            training_file: request.training_file.clone(),
            validation_file: request.validation_file.clone(),
            created_at: Utc::now().timestamp(),
            finished_at: None,
            hyperparameters: request.hyperparameters.clone(),
            result_files: Vec::new(),
            seed: request.seed,
            suffix: request.suffix.clone(),
            error: None,
        };
        let mut job = SimulatedJob {
            record,
            started: Instant::now(),
            stage: 0,
            cancelled: false,
            // Roughly four bytes per token.
            training_tokens: bytes / 4,
            events: Vec::new(),
        };
        let created_at = job.record.created_at;
        push_event(&mut job, created_at, "info", &format!("Validating training file: {}", request.training_file));

        let snapshot = job.record.clone();
        info!("Simulated job {} created", snapshot.id);
        state.jobs.insert(snapshot.id.clone(), job);
        Ok(snapshot)
    }

    async fn retrieve_job(&self, job_id: &str) -> TrackerResult<JobRecord> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(job_id)
            .with_context(|| format!("No such job: {}", job_id))?;
        self.refresh(job);
        Ok(job.record.clone())
    }

    async fn cancel_job(&self, job_id: &str) -> TrackerResult<JobRecord> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(job_id)
            .with_context(|| format!("No such job: {}", job_id))?;
        self.refresh(job);
        if !job.record.is_terminal() {
            let latest = job.events.last().map(|event| event.created_at).unwrap_or(job.record.created_at);
            let at = Utc::now().timestamp().max(latest);
            job.cancelled = true;
            job.record.status = JobStatus::Cancelled;
            job.record.finished_at = Some(at);
            push_event(job, at, "info", "Fine-tuning job cancelled");
        }
        Ok(job.record.clone())
    }

    async fn list_events(
        &self,
        job_id: &str,
        limit: Option<u32>,
        after: Option<String>,
    ) -> TrackerResult<EventPage> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(job_id)
            .with_context(|| format!("No such job: {}", job_id))?;
        self.refresh(job);

        let newest_first: Vec<&Event> = job.events.iter().rev().collect();
        let start = match after {
            Some(cursor) => newest_first.iter()
                .position(|event| event.id == cursor)
                .map(|index| index + 1)
                .with_context(|| format!("No such event: {}", cursor))?,
            None => 0,
        };
        let page_size = limit.map(|l| l as usize).unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let data: Vec<Event> = newest_first.iter()
            .skip(start)
            .take(page_size)
            .map(|event| (*event).clone())
            .collect();
        let has_more = start + data.len() < newest_first.len();
        Ok(EventPage { data, has_more })
    }

    async fn chat(&self, model: &str, messages: Vec<Message>) -> TrackerResult<String> {
        let prompt = messages.iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        Ok(format!("[{}] You asked: {}", model, prompt))
    }
}
