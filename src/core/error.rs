use std::time::Duration;
use thiserror::Error;
use crate::core::job::JobStatus;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// The service rejected the request as malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job {job_id} has no fine-tuned model yet (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("Job {job_id} did not reach a terminal status within {timeout:?} (last status: {last_status})")]
    Timeout {
        job_id: String,
        timeout: Duration,
        last_status: JobStatus,
    },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TrackerError::Validation(_))
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, TrackerError::NotReady { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TrackerError::Timeout { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, TrackerError::Transport(_))
    }
}
