use super::service::FineTuningService;
use crate::core::error::{TrackerError, TrackerResult};
use crate::core::job::{EventPage, FileObject, JobRecord, JobRequest, Message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::env;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAI {
    api_key: String,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAI {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
            max_tokens: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Base URL cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn generate_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .context("Failed to create Authorization header")?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn generate_chat_body(&self, model: &str, messages: &[Message]) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        action: &str,
    ) -> TrackerResult<T> {
        let response = self.client.get(self.endpoint(segments)?)
            .headers(self.generate_headers()?)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", action))?;
        handle_response(response, action).await
    }

    async fn post<T: DeserializeOwned>(&self, segments: &[&str], body: &Value, action: &str) -> TrackerResult<T> {
        let response = self.client.post(self.endpoint(segments)?)
            .headers(self.generate_headers()?)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", action))?;
        handle_response(response, action).await
    }
}

/// Decodes a success body, or maps the failure onto the error taxonomy.
async fn handle_response<T: DeserializeOwned>(response: Response, action: &str) -> TrackerResult<T> {
    let status = response.status();
    if status.is_success() {
        let response_json: Value = response.json().await
            .with_context(|| format!("Failed to parse {} response as JSON", action))?;
        info!("{} succeeded", action);
        debug!("Response: {:?}", response_json);
        let parsed = serde_json::from_value(response_json)
            .with_context(|| format!("Unexpected {} response shape", action))?;
        return Ok(parsed);
    }

    let error_text = response.text().await
        .with_context(|| format!("Failed to get error text from {} response", action))?;
    let message = error_message(&error_text);
    error!("{} failed ({}): {}", action, status, message);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(TrackerError::Validation(message))
        }
        _ => Err(anyhow::anyhow!("{} failed ({}): {}", action, status, message).into()),
    }
}

/// Pulls `error.message` out of an API error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl FineTuningService for OpenAI {
    async fn upload_file(&self, file_path: &Path, purpose: &str) -> TrackerResult<FileObject> {
        let content = tokio::fs::read(file_path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", file_path))?;

        let file_name = file_path.file_name()
            .and_then(|n| n.to_str())
            .context("Failed to get file name")?
            .to_string();

        let part = Part::bytes(content)
            .file_name(file_name)
            .mime_str("application/jsonl")
            .context("Failed to set MIME type")?;

        let form = Form::new()
            .part("file", part)
            .text("purpose", purpose.to_string());

        let response = self.client.post(self.endpoint(&["files"])?)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .context("Failed to send file upload request")?;

        handle_response(response, "File upload").await
    }

    async fn create_job(&self, request: &JobRequest) -> TrackerResult<JobRecord> {
        let body = serde_json::to_value(request)
            .context("Failed to serialize fine-tuning job request")?;
        self.post(&["fine_tuning", "jobs"], &body, "Fine-tuning job creation").await
    }

    async fn retrieve_job(&self, job_id: &str) -> TrackerResult<JobRecord> {
        self.get(&["fine_tuning", "jobs", job_id], &[], "Fine-tuning job retrieval").await
    }

    async fn cancel_job(&self, job_id: &str) -> TrackerResult<JobRecord> {
        self.post(&["fine_tuning", "jobs", job_id, "cancel"], &json!({}), "Fine-tuning job cancellation").await
    }

    async fn list_events(
        &self,
        job_id: &str,
        limit: Option<u32>,
        after: Option<String>,
    ) -> TrackerResult<EventPage> {
        let mut query = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(after) = after {
            query.push(("after", after));
        }
        self.get(&["fine_tuning", "jobs", job_id, "events"], &query, "Fine-tuning event listing").await
    }

    async fn chat(&self, model: &str, messages: Vec<Message>) -> TrackerResult<String> {
        let body = self.generate_chat_body(model, &messages);
        let response_value: Value = self.post(&["chat", "completions"], &body, "Chat completion").await?;
        let content = response_value["choices"][0]["message"]["content"]
            .as_str()
            .context("Failed to extract content from chat completion response")?
            .to_string();
        Ok(content)
    }
}
