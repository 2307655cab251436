use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

pub const FINE_TUNE_PURPOSE: &str = "fine-tune";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    ValidatingFiles,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Position along the lifecycle. All terminal statuses share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::ValidatingFiles => 0,
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::ValidatingFiles => "validating_files",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hyperparameter is either a number or a keyword such as `"auto"`.
/// Values are forwarded to the service as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperparameterValue {
    Number(serde_json::Number),
    Text(String),
}

impl HyperparameterValue {
    pub fn auto() -> Self {
        HyperparameterValue::Text("auto".to_string())
    }
}

impl FromStr for HyperparameterValue {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<serde_json::Number>() {
            Ok(number) => HyperparameterValue::Number(number),
            Err(_) => HyperparameterValue::Text(s.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_epochs: Option<HyperparameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<HyperparameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate_multiplier: Option<HyperparameterValue>,
}

impl Hyperparameters {
    pub fn is_empty(&self) -> bool {
        self.n_epochs.is_none() && self.batch_size.is_none() && self.learning_rate_multiplier.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WandbIntegration {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Experiment-tracking integration attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    #[serde(rename = "type")]
    pub kind: String,
    pub wandb: WandbIntegration,
}

impl Integration {
    pub fn wandb(project: impl Into<String>) -> Self {
        Self {
            kind: "wandb".to_string(),
            wandb: WandbIntegration {
                project: project.into(),
                name: None,
                entity: None,
                tags: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub model: String,
    pub training_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Hyperparameters>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub integrations: Vec<Integration>,
}

impl JobRequest {
    pub fn new(model: impl Into<String>, training_file: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            training_file: training_file.into(),
            validation_file: None,
            suffix: None,
            seed: None,
            hyperparameters: None,
            integrations: Vec::new(),
        }
    }

    pub fn with_validation_file(mut self, validation_file: impl Into<String>) -> Self {
        self.validation_file = Some(validation_file.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        if !hyperparameters.is_empty() {
            self.hyperparameters = Some(hyperparameters);
        }
        self
    }

    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integrations.push(integration);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
}

/// A fine-tuning job as last reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub model: String,
    #[serde(default)]
    pub fine_tuned_model: Option<String>,
    #[serde(default)]
    pub trained_tokens: Option<u64>,
    pub training_file: String,
    #[serde(default)]
    pub validation_file: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
    #[serde(default)]
    pub result_files: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default, alias = "user_provided_suffix")]
    pub suffix: Option<String>,
    #[serde(default)]
    pub error: Option<JobError>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A progress entry from the service's job log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub created_at: i64,
    #[serde(default = "default_level")]
    pub level: String,
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

fn default_level() -> String {
    "info".to_string()
}

/// One page of events, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub data: Vec<Event>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    pub bytes: u64,
    pub filename: String,
    pub purpose: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_uses_service_names() {
        let status: JobStatus = serde_json::from_value(json!("validating_files")).unwrap();
        assert_eq!(status, JobStatus::ValidatingFiles);
        assert_eq!(serde_json::to_value(JobStatus::Cancelled).unwrap(), json!("cancelled"));
    }

    #[test]
    fn test_terminal_statuses_share_last_rank() {
        let lifecycle = [JobStatus::ValidatingFiles, JobStatus::Queued, JobStatus::Running, JobStatus::Succeeded];
        assert!(lifecycle.windows(2).all(|pair| pair[0].rank() < pair[1].rank()));
        assert_eq!(JobStatus::Failed.rank(), JobStatus::Cancelled.rank());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_record_parses_service_response() {
        let record: JobRecord = serde_json::from_value(json!({
            "object": "fine_tuning.job",
            "id": "ftjob-abc123",
            "model": "gpt-4o-mini-2024-07-18",
            "created_at": 1721764800,
            "finished_at": null,
            "fine_tuned_model": null,
            "organization_id": "org-123",
            "result_files": [],
            "status": "validating_files",
            "validation_file": null,
            "training_file": "file-A",
            "hyperparameters": {"n_epochs": "auto", "batch_size": 4},
            "user_provided_suffix": "recipes",
            "seed": 42,
            "error": {}
        }))
        .unwrap();

        assert_eq!(record.status, JobStatus::ValidatingFiles);
        assert_eq!(record.suffix.as_deref(), Some("recipes"));
        let hyperparameters = record.hyperparameters.unwrap();
        assert_eq!(hyperparameters.n_epochs, Some(HyperparameterValue::auto()));
        assert_eq!(hyperparameters.batch_size, Some("4".parse().unwrap()));
    }

    #[test]
    fn test_request_omits_unset_fields() {
        let request = JobRequest::new("gpt-4o-mini-2024-07-18", "file-A")
            .with_hyperparameters(Hyperparameters::default());
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"model": "gpt-4o-mini-2024-07-18", "training_file": "file-A"})
        );
    }

    #[test]
    fn test_request_passes_options_through_verbatim() {
        let hyperparameters = Hyperparameters {
            n_epochs: Some("3".parse().unwrap()),
            batch_size: Some("auto".parse().unwrap()),
            learning_rate_multiplier: Some("0.5".parse().unwrap()),
        };
        let request = JobRequest::new("gpt-4o-mini-2024-07-18", "file-A")
            .with_validation_file("file-B")
            .with_suffix("recipes")
            .with_seed(7)
            .with_hyperparameters(hyperparameters)
            .with_integration(Integration::wandb("ft-runs"));

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gpt-4o-mini-2024-07-18",
                "training_file": "file-A",
                "validation_file": "file-B",
                "suffix": "recipes",
                "seed": 7,
                "hyperparameters": {"n_epochs": 3, "batch_size": "auto", "learning_rate_multiplier": 0.5},
                "integrations": [{"type": "wandb", "wandb": {"project": "ft-runs"}}]
            })
        );
    }
}
