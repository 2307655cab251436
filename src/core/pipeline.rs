use crate::adapters::service::FineTuningService;
use crate::core::error::TrackerResult;
use crate::core::job::{Event, FileObject, JobRecord, JobRequest, Message, FINE_TUNE_PURPOSE};
use crate::core::tracker::{chronological, extract_result_model, JobTracker, PollPolicy};
use log::info;
use std::path::PathBuf;

/// Everything needed to take a dataset all the way to a reply from the tuned model.
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub training_path: PathBuf,
    pub validation_path: Option<PathBuf>,
    /// Job options; its file ids are filled in from the uploads.
    pub job: JobRequest,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub policy: PollPolicy,
}

#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub training_file: FileObject,
    pub validation_file: Option<FileObject>,
    pub job: JobRecord,
    /// Oldest first.
    pub events: Vec<Event>,
    pub model: String,
    pub reply: String,
}

pub struct Pipeline<S: FineTuningService> {
    tracker: JobTracker<S>,
}

impl<S: FineTuningService> Pipeline<S> {
    pub fn new(tracker: JobTracker<S>) -> Pipeline<S> {
        Self { tracker }
    }

    pub fn tracker(&self) -> &JobTracker<S> {
        &self.tracker
    }

    pub async fn run<F>(&self, request: WorkflowRequest, on_poll: F) -> TrackerResult<WorkflowReport>
    where
        F: FnMut(&JobRecord),
    {
        let training_file = self.tracker.upload(&request.training_path, FINE_TUNE_PURPOSE).await?;
        let validation_file = match &request.validation_path {
            Some(path) => Some(self.tracker.upload(path, FINE_TUNE_PURPOSE).await?),
            None => None,
        };

        let mut job_request = request.job.clone();
        job_request.training_file = training_file.id.clone();
        job_request.validation_file = validation_file.as_ref().map(|file| file.id.clone());

        let submitted = self.tracker.submit(&job_request).await?;
        let job = self.tracker
            .await_terminal_with(&submitted.id, &request.policy, on_poll)
            .await?;

        let model = extract_result_model(&job)?;

        let events = chronological(self.tracker.collect_events(&job.id, None).await?);
        info!("Job {} finished as {} after {} events", job.id, job.status, events.len());

        let mut messages = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(Message::system(system_prompt.as_str()));
        }
        messages.push(Message::user(request.prompt.as_str()));
        let reply = self.tracker.infer(&model, messages).await?;

        Ok(WorkflowReport {
            training_file,
            validation_file,
            job,
            events,
            model,
            reply,
        })
    }
}
