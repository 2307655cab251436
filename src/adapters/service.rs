use async_trait::async_trait;
use std::path::Path;
use crate::core::error::TrackerResult;
use crate::core::job::{EventPage, FileObject, JobRecord, JobRequest, Message};

/// The hosted service that validates files, trains, and serves models.
///
/// Implementations report malformed submissions as
/// [`TrackerError::Validation`](crate::core::error::TrackerError::Validation)
/// and every other failure as a transport error. They never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FineTuningService: Send + Sync {
    async fn upload_file(&self, file_path: &Path, purpose: &str) -> TrackerResult<FileObject>;

    async fn create_job(&self, request: &JobRequest) -> TrackerResult<JobRecord>;

    async fn retrieve_job(&self, job_id: &str) -> TrackerResult<JobRecord>;

    async fn cancel_job(&self, job_id: &str) -> TrackerResult<JobRecord>;

    /// Returns one page of events, newest first, starting after the event id `after`.
    async fn list_events(
        &self,
        job_id: &str,
        limit: Option<u32>,
        after: Option<String>,
    ) -> TrackerResult<EventPage>;

    async fn chat(&self, model: &str, messages: Vec<Message>) -> TrackerResult<String>;
}
