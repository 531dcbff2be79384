/// Tests for the scheduler: job CRUD, manual triggering, retries, the
/// execution wall clock, and start/stop idempotence.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agenthive::client::{
    ChunkStream, CompletionChunk, LlmClient, LlmError, LlmErrorKind, ProviderRequest,
    ProviderResponse,
};
use agenthive::engine::ChatEngine;
use agenthive::error::EngineError;
use agenthive::gateway::Gateway;
use agenthive::protection::SessionProtection;
use agenthive::scheduler::{
    JobPayload, JobSpec, PipelineRunner, Scheduler, SessionMode,
};
use agenthive::store::{CronJobRecord, SessionStore};
use agenthive::tool_protocol::ToolRegistry;
use agenthive::tools::register_builtin_tools;

/// Mock client whose completions take a configurable amount of time.
struct SlowClient {
    delay: Duration,
}

#[async_trait]
impl LlmClient for SlowClient {
    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok(ProviderResponse {
            content: "done".into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        })
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        let response = self.complete(request).await?;
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(
            CompletionChunk {
                content: response.content,
                finish_reason: Some("stop".into()),
                ..Default::default()
            },
        )])))
    }
}

fn scheduler_with_delay(delay: Duration) -> (Arc<Scheduler>, Arc<SessionStore>) {
    agenthive::init_logger();
    let store = Arc::new(SessionStore::in_memory().unwrap());
    let gateway = Arc::new(Gateway::new(Arc::new(SlowClient { delay }), "balanced"));
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry);
    let tools = Arc::new(registry);
    let protection = Arc::new(SessionProtection::default());
    let engine = ChatEngine::new(store.clone(), gateway, tools.clone(), protection);
    let scheduler = Scheduler::new(store.clone(), engine, tools);
    (scheduler, store)
}

#[tokio::test]
async fn add_job_validates_the_schedule() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));

    let err = scheduler
        .add_job(JobSpec::new("bad", "Bad", "every tuesday"))
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let job = scheduler
        .add_job(
            JobSpec::new("good", "Good", "30 9 * * 1-5")
                .with_payload(JobPayload::Prompt("morning report".into())),
        )
        .unwrap();
    assert_eq!(job.schedule, "0 30 9 * * 1-5");
    assert!(job.next_run_at.is_some());
}

#[tokio::test]
async fn manual_trigger_runs_and_records_history() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    scheduler
        .add_job(
            JobSpec::new("digest", "Digest", "0 0 3 * * *")
                .with_payload(JobPayload::Prompt("summarise".into())),
        )
        .unwrap();

    scheduler.trigger_job("digest").await.unwrap();

    let job = scheduler.get_job("digest").unwrap();
    assert_eq!(job.run_count, 1);
    assert_eq!(job.success_count, 1);
    assert_eq!(job.last_status.as_deref(), Some("success"));

    let history = scheduler.job_history("digest", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "success");
}

#[tokio::test]
async fn slow_jobs_are_recorded_as_timeouts() {
    // The payload takes ~5s; the wall is 1s.
    let (scheduler, store) = scheduler_with_delay(Duration::from_secs(5));
    scheduler
        .add_job(
            JobSpec::new("slow", "Slow", "0 0 3 * * *")
                .with_payload(JobPayload::Prompt("crunch".into()))
                .with_max_duration(1),
        )
        .unwrap();

    scheduler.trigger_job("slow").await.unwrap();

    let history = scheduler.job_history("slow", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "timeout");

    // The next scheduled instant is still derived from the cron expression.
    let job = store.get_job("slow").unwrap().unwrap();
    assert!(job.next_run_at.is_some());
    assert_eq!(job.fail_count, 1);
}

struct FlakyPipeline {
    attempts: AtomicUsize,
    succeed_on: usize,
}

#[async_trait]
impl PipelineRunner for FlakyPipeline {
    async fn run(&self, _job: &CronJobRecord) -> Result<String, EngineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= self.succeed_on {
            Ok("pipeline done".into())
        } else {
            Err(EngineError::Other(format!("attempt {} failed", attempt)))
        }
    }
}

#[tokio::test]
async fn retries_back_off_and_eventually_succeed() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    let pipeline = Arc::new(FlakyPipeline {
        attempts: AtomicUsize::new(0),
        succeed_on: 2,
    });
    scheduler.register_pipeline("nightly", pipeline.clone());
    scheduler
        .add_job(
            JobSpec::new("pipe", "Pipe", "0 0 3 * * *")
                .with_payload(JobPayload::Pipeline("nightly".into()))
                .with_retries(2)
                .with_max_duration(30),
        )
        .unwrap();

    scheduler.trigger_job("pipe").await.unwrap();

    assert_eq!(pipeline.attempts.load(Ordering::SeqCst), 2);
    let job = scheduler.get_job("pipe").unwrap();
    assert_eq!(job.success_count, 1);
}

#[tokio::test]
async fn exhausted_retries_record_an_error() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    let pipeline = Arc::new(FlakyPipeline {
        attempts: AtomicUsize::new(0),
        succeed_on: 99,
    });
    scheduler.register_pipeline("doomed", pipeline.clone());
    scheduler
        .add_job(
            JobSpec::new("doom", "Doom", "0 0 3 * * *")
                .with_payload(JobPayload::Pipeline("doomed".into()))
                .with_retries(1)
                .with_max_duration(30),
        )
        .unwrap();

    scheduler.trigger_job("doom").await.unwrap();

    assert_eq!(pipeline.attempts.load(Ordering::SeqCst), 2); // first try + 1 retry
    let history = scheduler.job_history("doom", 10).unwrap();
    assert_eq!(history[0].status, "error");
    assert!(history[0].error.as_deref().unwrap().contains("attempt 2"));
}

#[tokio::test]
async fn skill_payloads_invoke_registered_tools() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    scheduler
        .add_job(
            JobSpec::new("tick", "Tick", "5s").with_payload(JobPayload::Skill("current_time".into())),
        )
        .unwrap();

    scheduler.trigger_job("tick").await.unwrap();

    let job = scheduler.get_job("tick").unwrap();
    assert_eq!(job.last_status.as_deref(), Some("success"));
}

#[tokio::test]
async fn shared_sessions_are_reused_across_runs() {
    let (scheduler, store) = scheduler_with_delay(Duration::from_millis(1));
    scheduler
        .add_job(
            JobSpec::new("chatty", "Chatty", "0 0 3 * * *")
                .with_payload(JobPayload::Prompt("hello".into()))
                .with_session_mode(SessionMode::Shared),
        )
        .unwrap();

    scheduler.trigger_job("chatty").await.unwrap();
    scheduler.trigger_job("chatty").await.unwrap();

    let page = store
        .list_sessions(&agenthive::store::SessionFilter {
            limit: 100,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 1, "shared mode reuses one session");
    // Two runs, two turns: four messages in the shared session.
    assert_eq!(page.sessions[0].message_count, 4);
}

#[tokio::test]
async fn isolated_sessions_end_after_each_run() {
    let (scheduler, store) = scheduler_with_delay(Duration::from_millis(1));
    scheduler
        .add_job(
            JobSpec::new("solo", "Solo", "0 0 3 * * *")
                .with_payload(JobPayload::Prompt("hello".into())),
        )
        .unwrap();

    scheduler.trigger_job("solo").await.unwrap();
    scheduler.trigger_job("solo").await.unwrap();

    let page = store
        .list_sessions(&agenthive::store::SessionFilter {
            limit: 100,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 2, "isolated mode creates a session per run");
    assert!(page
        .sessions
        .iter()
        .all(|s| s.status == agenthive::store::SessionStatus::Ended));
}

#[tokio::test]
async fn start_is_idempotent_and_stop_waits() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    scheduler.start().unwrap();
    scheduler.start().unwrap(); // no-op
    assert!(scheduler.is_running());
    scheduler.stop(Duration::from_secs(1)).await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn unknown_jobs_are_reported() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    let err = scheduler.trigger_job("ghost").await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert!(scheduler.remove_job("ghost").is_err());
}

#[tokio::test]
async fn toggling_clears_and_restores_next_run() {
    let (scheduler, _store) = scheduler_with_delay(Duration::from_millis(1));
    scheduler
        .add_job(JobSpec::new("flip", "Flip", "10m").with_payload(JobPayload::Prompt("x".into())))
        .unwrap();

    scheduler.toggle_job("flip", false).unwrap();
    assert!(scheduler.get_job("flip").unwrap().next_run_at.is_none());

    scheduler.toggle_job("flip", true).unwrap();
    assert!(scheduler.get_job("flip").unwrap().next_run_at.is_some());
}
