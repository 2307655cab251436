use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::adapters::openai::DEFAULT_BASE_URL;
use crate::core::job::{Event, HyperparameterValue, Hyperparameters, Integration, JobRecord, JobRequest, FINE_TUNE_PURPOSE};
use crate::core::tracker::PollPolicy;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[clap(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Run against an in-process simulated service instead of the API.
    #[clap(long)]
    pub simulate: bool,

    /// Seconds each simulated job stage lasts.
    #[clap(long, default_value = "2")]
    pub simulate_step: u64,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a dataset file.
    Upload {
        path: PathBuf,
        #[clap(long, default_value = FINE_TUNE_PURPOSE)]
        purpose: String,
    },
    /// Start a fine-tuning job from uploaded file ids.
    Create {
        #[clap(long)]
        training_file: String,
        #[clap(long)]
        validation_file: Option<String>,
        #[clap(flatten)]
        options: JobOptions,
    },
    /// Print the current state of a job.
    Status { job_id: String },
    /// Poll a job until it finishes.
    Wait {
        job_id: String,
        #[clap(flatten)]
        polling: PollOptions,
    },
    /// List a job's events.
    Events {
        job_id: String,
        /// Print at most this many of the newest events; omit to read the whole log.
        #[clap(long)]
        limit: Option<u32>,
        #[clap(long)]
        after: Option<String>,
        /// Print oldest first instead of newest first.
        #[clap(long)]
        chronological: bool,
    },
    /// Request cancellation of a job.
    Cancel { job_id: String },
    /// Print the fine-tuned model of a finished job.
    #[clap(name = "result")]
    ResultModel { job_id: String },
    /// Send a prompt to a model.
    Chat {
        #[clap(long)]
        model: String,
        #[clap(long)]
        system: Option<String>,
        prompt: String,
    },
    /// Upload, train, wait, read events, and query the tuned model.
    Run {
        #[clap(long)]
        training: PathBuf,
        #[clap(long)]
        validation: Option<PathBuf>,
        #[clap(long)]
        system: Option<String>,
        #[clap(long, default_value = "Hello! What can you do?")]
        prompt: String,
        #[clap(flatten)]
        options: JobOptions,
        #[clap(flatten)]
        polling: PollOptions,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct JobOptions {
    #[clap(long, default_value = "gpt-4o-mini-2024-07-18")]
    pub model: String,

    #[clap(long)]
    pub suffix: Option<String>,

    #[clap(long)]
    pub seed: Option<u64>,

    /// Number of epochs, or "auto".
    #[clap(long)]
    pub n_epochs: Option<HyperparameterValue>,

    /// Batch size, or "auto".
    #[clap(long)]
    pub batch_size: Option<HyperparameterValue>,

    /// Learning rate multiplier, or "auto".
    #[clap(long)]
    pub learning_rate_multiplier: Option<HyperparameterValue>,

    /// Weights & Biases project to report training runs to.
    #[clap(long)]
    pub wandb_project: Option<String>,
}

impl JobOptions {
    pub fn to_request(&self, training_file: String, validation_file: Option<String>) -> JobRequest {
        let mut request = JobRequest::new(self.model.clone(), training_file)
            .with_hyperparameters(Hyperparameters {
                n_epochs: self.n_epochs.clone(),
                batch_size: self.batch_size.clone(),
                learning_rate_multiplier: self.learning_rate_multiplier.clone(),
            });
        if let Some(validation_file) = validation_file {
            request = request.with_validation_file(validation_file);
        }
        if let Some(suffix) = &self.suffix {
            request = request.with_suffix(suffix.clone());
        }
        if let Some(seed) = self.seed {
            request = request.with_seed(seed);
        }
        if let Some(project) = &self.wandb_project {
            request = request.with_integration(Integration::wandb(project.clone()));
        }
        request
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PollOptions {
    /// Seconds between status checks.
    #[clap(long, default_value = "10")]
    pub interval: u64,

    /// Give up after this many seconds.
    #[clap(long, default_value = "3600")]
    pub timeout: u64,

    /// Multiply the interval by this after every check.
    #[clap(long, default_value = "1.0")]
    pub backoff: f64,

    /// Upper bound in seconds for the backed-off interval.
    #[clap(long, default_value = "60")]
    pub max_interval: u64,
}

impl PollOptions {
    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy::fixed(Duration::from_secs(self.interval), Duration::from_secs(self.timeout))
            .with_backoff(self.backoff, Duration::from_secs(self.max_interval))
    }
}

pub fn create_spinner() -> Result<ProgressBar, io::Error> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

pub fn status_line(job: &JobRecord) -> String {
    match job.trained_tokens {
        Some(tokens) => format!("{} is {} ({} tokens trained)", job.id, job.status, tokens),
        None => format!("{} is {}", job.id, job.status),
    }
}

pub fn format_timestamp(unix_seconds: i64) -> String {
    DateTime::from_timestamp(unix_seconds, 0)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix_seconds.to_string())
}

pub fn format_event(event: &Event) -> String {
    format!("{} [{}] {}", format_timestamp(event.created_at), event.level, event.message)
}

pub fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output as JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_options_build_request() {
        let args = Args::parse_from([
            "finetrack", "create",
            "--training-file", "file-A",
            "--n-epochs", "3",
            "--batch-size", "auto",
            "--wandb-project", "ft-runs",
        ]);
        let Command::Create { training_file, validation_file, options } = args.command else {
            panic!("expected create command");
        };
        let request = options.to_request(training_file, validation_file);

        assert_eq!(request.model, "gpt-4o-mini-2024-07-18");
        let hyperparameters = request.hyperparameters.unwrap();
        assert_eq!(hyperparameters.batch_size, Some(HyperparameterValue::auto()));
        assert_eq!(hyperparameters.learning_rate_multiplier, None);
        assert_eq!(request.integrations, vec![Integration::wandb("ft-runs")]);
    }

    #[test]
    fn test_poll_options_default_to_fixed_interval() {
        let args = Args::parse_from(["finetrack", "wait", "ftjob-1"]);
        let Command::Wait { job_id, polling } = args.command else {
            panic!("expected wait command");
        };
        assert_eq!(job_id, "ftjob-1");
        let policy = polling.to_policy();
        assert_eq!(policy.interval, Duration::from_secs(10));
        assert_eq!(policy.timeout, Duration::from_secs(3600));
        assert_eq!(policy.backoff, 1.0);
    }

    #[test]
    fn test_poll_options_accept_extreme_values() {
        let timeout = u64::MAX.to_string();
        let args = Args::parse_from([
            "finetrack", "wait", "ftjob-1",
            "--timeout", timeout.as_str(),
            "--backoff", "1e30",
        ]);
        let Command::Wait { polling, .. } = args.command else {
            panic!("expected wait command");
        };
        let policy = polling.to_policy();
        assert_eq!(policy.timeout, Duration::from_secs(u64::MAX));
        assert_eq!(policy.backoff, 1e30);
        assert_eq!(policy.max_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_format_timestamp_falls_back_to_raw_value() {
        assert_eq!(format_timestamp(i64::MAX), i64::MAX.to_string());
        assert_eq!(format_timestamp(0).len(), "1970-01-01 00:00:00".len());
    }
}
