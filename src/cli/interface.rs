use anyhow::{Context, Result};
use clap::Parser;
use futures::TryStreamExt;
use log::info;
use std::time::Duration;
use crate::adapters::openai::*;
use crate::adapters::service::FineTuningService;
use crate::adapters::simulated::SimulatedService;
use crate::core::job::{Event, JobRecord, Message};
use crate::core::pipeline::*;
use crate::core::tracker::*;
use crate::utils::lib::*;

pub async fn run_cli_interface() -> Result<()> {
    let args = Args::parse();
    if args.simulate {
        info!("Using the simulated fine-tuning service");
        let service = SimulatedService::new(Duration::from_secs(args.simulate_step));
        return dispatch(JobTracker::new(service), args.command).await;
    }

    let api_key = args.api_key
        .context("An API key is required: pass --api-key or set OPENAI_API_KEY")?;
    let service = OpenAI::new(api_key).with_base_url(args.base_url);
    dispatch(JobTracker::new(service), args.command).await
}

async fn dispatch<S: FineTuningService>(tracker: JobTracker<S>, command: Command) -> Result<()> {
    match command {
        Command::Upload { path, purpose } => {
            let file = tracker.upload(&path, &purpose).await
                .context("Failed to upload file")?;
            println!("{}", to_pretty_json(&file)?);
        }
        Command::Create { training_file, validation_file, options } => {
            let request = options.to_request(training_file, validation_file);
            let job = tracker.submit(&request).await
                .context("Failed to create fine-tuning job")?;
            println!("{}", to_pretty_json(&job)?);
        }
        Command::Status { job_id } => {
            let job = tracker.poll(&job_id).await
                .context("Failed to retrieve fine-tuning job")?;
            println!("{}", to_pretty_json(&job)?);
        }
        Command::Wait { job_id, polling } => {
            let job = wait_with_spinner(&tracker, &job_id, &polling.to_policy()).await?;
            println!("{}", to_pretty_json(&job)?);
        }
        Command::Events { job_id, limit, after, chronological: oldest_first } => {
            let events = fetch_events(&tracker, &job_id, limit, after, oldest_first).await?;
            for event in &events {
                println!("{}", format_event(event));
            }
        }
        Command::Cancel { job_id } => {
            let job = tracker.cancel(&job_id).await
                .context("Failed to cancel fine-tuning job")?;
            println!("{}", status_line(&job));
        }
        Command::ResultModel { job_id } => {
            let job = tracker.poll(&job_id).await
                .context("Failed to retrieve fine-tuning job")?;
            println!("{}", extract_result_model(&job)?);
        }
        Command::Chat { model, system, prompt } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));
            let reply = tracker.infer(&model, messages).await
                .context("Failed to query model")?;
            println!("{}", reply);
        }
        Command::Run { training, validation, system, prompt, options, polling } => {
            let request = WorkflowRequest {
                training_path: training,
                validation_path: validation,
                job: options.to_request(String::new(), None),
                system_prompt: system,
                prompt,
                policy: polling.to_policy(),
            };
            let spinner = create_spinner()
                .context("Failed to create progress spinner")?;
            let pipeline = Pipeline::new(tracker);
            let result = pipeline.run(request, |job| spinner.set_message(status_line(job))).await;
            spinner.finish_and_clear();
            let report = result.context("Fine-tuning workflow failed")?;

            println!("Training file: {}", report.training_file.id);
            if let Some(validation_file) = &report.validation_file {
                println!("Validation file: {}", validation_file.id);
            }
            println!("{}", status_line(&report.job));
            for event in &report.events {
                println!("{}", format_event(event));
            }
            println!("Fine-tuned model: {}", report.model);
            println!("{}", report.reply);
        }
    }
    Ok(())
}

/// Reads at most `limit` events, or the whole log when no limit is given.
async fn fetch_events<S: FineTuningService>(
    tracker: &JobTracker<S>,
    job_id: &str,
    limit: Option<u32>,
    after: Option<String>,
    oldest_first: bool,
) -> Result<Vec<Event>> {
    let events = match limit {
        Some(limit) => tracker.recent_events(job_id, limit, after).await,
        None => tracker.list_events(job_id, None, after).try_collect().await,
    }
    .context("Failed to list fine-tuning events")?;
    Ok(if oldest_first { chronological(events) } else { events })
}

async fn wait_with_spinner<S: FineTuningService>(
    tracker: &JobTracker<S>,
    job_id: &str,
    policy: &PollPolicy,
) -> Result<JobRecord> {
    let spinner = create_spinner()
        .context("Failed to create progress spinner")?;
    let result = tracker
        .await_terminal_with(job_id, policy, |job| spinner.set_message(status_line(job)))
        .await;
    spinner.finish_and_clear();
    result.context("Failed waiting for fine-tuning job")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobRequest;

    async fn finished_job(tracker: &JobTracker<SimulatedService>) -> String {
        let job = tracker.submit(&JobRequest::new("gpt-4o-mini", "file-A")).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        tracker.poll(&job.id).await.unwrap();
        job.id
    }

    fn tracker() -> JobTracker<SimulatedService> {
        JobTracker::new(SimulatedService::new(Duration::from_secs(10)).with_existing_file("file-A", 400))
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_limit_caps_output() {
        let tracker = tracker();
        let job_id = finished_job(&tracker).await;

        let page = tracker.service().list_events(&job_id, Some(3), None).await.unwrap();
        assert!(page.has_more);

        let events = fetch_events(&tracker, &job_id, Some(3), None, false).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "The job has successfully completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_without_limit_reads_whole_log() {
        let tracker = tracker();
        let job_id = finished_job(&tracker).await;

        let events = fetch_events(&tracker, &job_id, None, None, true).await.unwrap();
        assert_eq!(events.len(), 8);
        assert_eq!(events[0].message, "Validating training file: file-A");
    }
}
