//! Cron and interval job scheduling.
//!
//! Jobs are durable rows (see
//! [`CronJobRecord`](crate::store::CronJobRecord)) fired by a one-second tick
//! loop.  A firing spawns a bounded execution: the whole attempt sequence —
//! including retries with exponential back-off — runs under a single
//! `max_duration_seconds` wall; blowing the wall records a `timeout` and is
//! not retried.  Every execution appends a history row and updates the job's
//! counters, whether it was fired by the clock or by
//! [`Scheduler::trigger_job`].
//!
//! Schedule grammar: 5-field cron (`m h dom mon dow`, normalised by
//! prepending a seconds field), 6-field cron (`s m h dom mon dow`), or the
//! interval shorthand `Ns`/`Nm`/`Nh` with `N ≥ 1`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::agenthive::engine::{ChatEngine, SendOptions};
use crate::agenthive::error::EngineError;
use crate::agenthive::store::{
    CronJobRecord, NewSession, SessionStatus, SessionStore, SessionType,
};
use crate::agenthive::tool_protocol::{ToolInvocation, ToolRegistry};

/// Scheduler failures.
#[derive(Debug, Clone)]
pub enum SchedulerError {
    /// The schedule expression did not parse.
    InvalidSchedule(String),
    /// No job with that id.
    UnknownJob(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::InvalidSchedule(expr) => {
                write!(f, "invalid schedule expression: {}", expr)
            }
            SchedulerError::UnknownJob(id) => write!(f, "unknown job: {}", id),
        }
    }
}

impl std::error::Error for SchedulerError {}

// ---------------------------------------------------------------------------
// Schedule expressions
// ---------------------------------------------------------------------------

/// A parsed schedule: cron expression or fixed interval.
#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Cron schedule with its normalised 6-field expression.
    Cron {
        schedule: Box<cron::Schedule>,
        normalized: String,
    },
    /// Fixed interval with its canonical shorthand (`90s`, `5m`, `2h`).
    Every { period: Duration, canonical: String },
}

impl JobSchedule {
    /// Parse a schedule expression.
    ///
    /// Accepts 5-field cron (seconds field prepended), 6-field cron, and
    /// `Ns`/`Nm`/`Nh` interval shorthand with `N ≥ 1`.
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(SchedulerError::InvalidSchedule(expr.to_string()));
        }

        if let Some(interval) = parse_interval(expr) {
            return interval;
        }

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 => fields.join(" "),
            _ => return Err(SchedulerError::InvalidSchedule(expr.to_string())),
        };
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|_| SchedulerError::InvalidSchedule(expr.to_string()))?;
        Ok(JobSchedule::Cron {
            schedule: Box::new(schedule),
            normalized,
        })
    }

    /// The next firing instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            JobSchedule::Cron { schedule, .. } => schedule.after(&after).next(),
            JobSchedule::Every { period, .. } => {
                chrono::Duration::from_std(*period)
                    .ok()
                    .map(|delta| after + delta)
            }
        }
    }
}

impl fmt::Display for JobSchedule {
    /// Prints the normalised form; `parse` of the printed form yields an
    /// equivalent schedule with the same printed form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSchedule::Cron { normalized, .. } => write!(f, "{}", normalized),
            JobSchedule::Every { canonical, .. } => write!(f, "{}", canonical),
        }
    }
}

fn parse_interval(expr: &str) -> Option<Result<JobSchedule, SchedulerError>> {
    let unit = expr.chars().last()?;
    if !matches!(unit, 's' | 'm' | 'h') {
        return None;
    }
    let digits = &expr[..expr.len() - 1];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let Ok(n) = digits.parse::<u64>() else {
        return Some(Err(SchedulerError::InvalidSchedule(expr.to_string())));
    };
    if n == 0 {
        return Some(Err(SchedulerError::InvalidSchedule(expr.to_string())));
    }
    let seconds = match unit {
        's' => n,
        'm' => n * 60,
        _ => n * 3600,
    };
    Some(Ok(JobSchedule::Every {
        period: Duration::from_secs(seconds),
        canonical: format!("{}{}", n, unit),
    }))
}

// ---------------------------------------------------------------------------
// Payloads and job definitions
// ---------------------------------------------------------------------------

/// What a job does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    /// Send this text as a user message through the chat engine.
    Prompt(String),
    /// Invoke a registered tool by name.
    Skill(String),
    /// Invoke a named pipeline registered by the host application.
    Pipeline(String),
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Prompt(_) => "prompt",
            JobPayload::Skill(_) => "skill",
            JobPayload::Pipeline(_) => "pipeline",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            JobPayload::Prompt(s) | JobPayload::Skill(s) | JobPayload::Pipeline(s) => s,
        }
    }

    pub fn from_parts(kind: &str, value: &str) -> Self {
        match kind {
            "skill" => JobPayload::Skill(value.to_string()),
            "pipeline" => JobPayload::Pipeline(value.to_string()),
            _ => JobPayload::Prompt(value.to_string()),
        }
    }
}

/// How prompt jobs use sessions across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// A fresh session per run, ended when the run finishes.
    #[default]
    Isolated,
    /// One session reused across runs.
    Shared,
    /// One session reused across runs and never ended.
    Persistent,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Isolated => "isolated",
            SessionMode::Shared => "shared",
            SessionMode::Persistent => "persistent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shared" => SessionMode::Shared,
            "persistent" => SessionMode::Persistent,
            _ => SessionMode::Isolated,
        }
    }
}

/// Caller-facing job definition; counters and run bookkeeping live on the
/// stored [`CronJobRecord`].
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub agent_id: Option<String>,
    pub payload: JobPayload,
    pub session_mode: SessionMode,
    pub max_duration_s: u64,
    pub retry_count: u32,
    pub enabled: bool,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule: schedule.into(),
            agent_id: None,
            payload: JobPayload::Prompt(String::new()),
            session_mode: SessionMode::Isolated,
            max_duration_s: 300,
            retry_count: 0,
            enabled: true,
        }
    }

    pub fn with_payload(mut self, payload: JobPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_session_mode(mut self, mode: SessionMode) -> Self {
        self.session_mode = mode;
        self
    }

    pub fn with_max_duration(mut self, seconds: u64) -> Self {
        self.max_duration_s = seconds;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Host-registered composite invoked by `pipeline` payloads.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, job: &CronJobRecord) -> Result<String, EngineError>;
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the job table and fires due jobs.
pub struct Scheduler {
    store: Arc<SessionStore>,
    engine: Arc<ChatEngine>,
    tools: Arc<ToolRegistry>,
    pipelines: Mutex<HashMap<String, Arc<dyn PipelineRunner>>>,
    executing: Arc<Mutex<HashSet<String>>>,
    /// Reused sessions for `shared`/`persistent` prompt jobs, keyed by job id.
    job_sessions: Arc<Mutex<HashMap<String, String>>>,
    running: AtomicBool,
    shutdown: Mutex<Option<tokio::sync::watch::Sender<bool>>>,
    tick_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Back-reference to the owning `Arc`, for the tick loop and spawned runs.
    self_ref: std::sync::Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(
        store: Arc<SessionStore>,
        engine: Arc<ChatEngine>,
        tools: Arc<ToolRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            engine,
            tools,
            pipelines: Mutex::new(HashMap::new()),
            executing: Arc::new(Mutex::new(HashSet::new())),
            job_sessions: Arc::new(Mutex::new(HashMap::new())),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            tick_handle: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Register a named pipeline target.
    pub fn register_pipeline(&self, name: impl Into<String>, runner: Arc<dyn PipelineRunner>) {
        self.pipelines
            .lock()
            .expect("pipeline registry poisoned")
            .insert(name.into(), runner);
    }

    /// Whether the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Create a job.  Validates the schedule, computes the first next-run
    /// instant, and persists the row.
    pub fn add_job(&self, spec: JobSpec) -> Result<CronJobRecord, EngineError> {
        let schedule = JobSchedule::parse(&spec.schedule)?;
        let next_run_at = if spec.enabled {
            schedule.next_after(Utc::now())
        } else {
            None
        };
        let record = CronJobRecord {
            id: spec.id.clone(),
            name: spec.name,
            schedule: schedule.to_string(),
            agent_id: spec.agent_id,
            enabled: spec.enabled,
            payload_kind: spec.payload.kind().to_string(),
            payload: spec.payload.value().to_string(),
            session_mode: spec.session_mode.as_str().to_string(),
            max_duration_s: spec.max_duration_s,
            retry_count: spec.retry_count,
            run_count: 0,
            success_count: 0,
            fail_count: 0,
            last_run_at: None,
            last_status: None,
            last_duration_ms: None,
            last_error: None,
            next_run_at,
            created_at: Utc::now(),
        };
        self.store.insert_job(&record)?;
        Ok(record)
    }

    /// Update a job definition.  Counters are preserved.
    pub fn update_job(&self, spec: JobSpec) -> Result<CronJobRecord, EngineError> {
        let existing = self
            .store
            .get_job(&spec.id)?
            .ok_or_else(|| SchedulerError::UnknownJob(spec.id.clone()))?;
        let schedule = JobSchedule::parse(&spec.schedule)?;
        let next_run_at = if spec.enabled {
            schedule.next_after(Utc::now())
        } else {
            None
        };
        let record = CronJobRecord {
            name: spec.name,
            schedule: schedule.to_string(),
            agent_id: spec.agent_id,
            enabled: spec.enabled,
            payload_kind: spec.payload.kind().to_string(),
            payload: spec.payload.value().to_string(),
            session_mode: spec.session_mode.as_str().to_string(),
            max_duration_s: spec.max_duration_s,
            retry_count: spec.retry_count,
            next_run_at,
            ..existing
        };
        self.store.update_job(&record)?;
        Ok(record)
    }

    /// Delete a job and its history.
    pub fn remove_job(&self, id: &str) -> Result<(), EngineError> {
        if !self.store.delete_job(id)? {
            return Err(SchedulerError::UnknownJob(id.to_string()).into());
        }
        self.job_sessions
            .lock()
            .expect("job session map poisoned")
            .remove(id);
        Ok(())
    }

    /// Enable or disable a job.
    pub fn toggle_job(&self, id: &str, enabled: bool) -> Result<(), EngineError> {
        let job = self
            .store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
        self.store.set_job_enabled(id, enabled)?;
        let next_run_at = if enabled {
            JobSchedule::parse(&job.schedule)?.next_after(Utc::now())
        } else {
            None
        };
        self.store.set_job_next_run(id, next_run_at)?;
        Ok(())
    }

    /// Fetch a job.
    pub fn get_job(&self, id: &str) -> Result<CronJobRecord, EngineError> {
        Ok(self
            .store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?)
    }

    /// List all jobs.
    pub fn list_jobs(&self) -> Result<Vec<CronJobRecord>, EngineError> {
        Ok(self.store.list_jobs()?)
    }

    /// Execution history of a job, newest first (`limit ≤ 500`).
    pub fn job_history(
        &self,
        id: &str,
        limit: u32,
    ) -> Result<Vec<crate::agenthive::store::ExecutionRecord>, EngineError> {
        self.store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
        Ok(self.store.job_history(id, limit)?)
    }

    /// Run a job immediately, ignoring its schedule.  Counts as a normal run
    /// in the stats.
    pub async fn trigger_job(&self, id: &str) -> Result<(), EngineError> {
        let job = self
            .store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
        {
            let mut executing = self.executing.lock().expect("executing set poisoned");
            if !executing.insert(job.id.clone()) {
                // Already running; treat the manual trigger as satisfied.
                return Ok(());
            }
        }
        self.run_job(job).await;
        Ok(())
    }

    /// Start the tick loop.  Idempotent: a second call is a no-op.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Recompute next-run instants for the enabled jobs we are adopting.
        let now = Utc::now();
        for job in self.store.list_jobs()? {
            if !job.enabled {
                continue;
            }
            let needs_recompute = job.next_run_at.map(|t| t < now).unwrap_or(true);
            if needs_recompute {
                let next = JobSchedule::parse(&job.schedule)?.next_after(now);
                self.store.set_job_next_run(&job.id, next)?;
            }
        }

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        *self.shutdown.lock().expect("shutdown slot poisoned") = Some(shutdown_tx);

        let scheduler = self
            .self_ref
            .upgrade()
            .ok_or_else(|| EngineError::Other("scheduler is shutting down".into()))?;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if let Err(err) = scheduler.fire_due_jobs() {
                    log::error!("Scheduler: tick failed: {}", err);
                }
            }
        });
        *self.tick_handle.lock().expect("tick handle poisoned") = Some(handle);

        log::info!("Scheduler: started");
        Ok(())
    }

    /// Stop the tick loop, waiting up to `grace` for in-flight executions.
    pub async fn stop(&self, grace: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown.lock().expect("shutdown slot poisoned").take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.tick_handle.lock().expect("tick handle poisoned").take() {
            let _ = handle.await;
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.executing.lock().expect("executing set poisoned").is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("Scheduler: grace window elapsed with jobs still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        log::info!("Scheduler: stopped");
    }

    /// One tick: spawn an execution for every due, enabled, non-running job.
    fn fire_due_jobs(&self) -> Result<(), EngineError> {
        let now = Utc::now();
        for job in self.store.list_jobs()? {
            if !job.enabled {
                continue;
            }
            let Some(next_run_at) = job.next_run_at else {
                continue;
            };
            if next_run_at > now {
                continue;
            }
            {
                let mut executing = self.executing.lock().expect("executing set poisoned");
                if !executing.insert(job.id.clone()) {
                    continue;
                }
            }
            // Advance the schedule before running so a slow job cannot
            // re-fire its own instant.
            let next = JobSchedule::parse(&job.schedule)?.next_after(now);
            self.store.set_job_next_run(&job.id, next)?;

            let Some(scheduler) = self.self_ref.upgrade() else {
                break;
            };
            tokio::spawn(async move {
                scheduler.run_job(job).await;
            });
        }
        Ok(())
    }

    /// Execute a job under its wall clock, with retries, and record the
    /// outcome.  Never panics the scheduler: every error ends up in the
    /// history table.
    async fn run_job(&self, job: CronJobRecord) {
        let started = tokio::time::Instant::now();
        let wall = Duration::from_secs(job.max_duration_s.max(1));

        let outcome = tokio::time::timeout(wall, self.execute_with_retries(&job)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, error) = match &outcome {
            Err(_) => ("timeout", Some(format!("exceeded {}s wall clock", job.max_duration_s))),
            Ok(Ok(_)) => ("success", None),
            Ok(Err(err)) => ("error", Some(err.to_string())),
        };

        let next_run_at = JobSchedule::parse(&job.schedule)
            .ok()
            .and_then(|s| s.next_after(Utc::now()));
        if let Err(err) = self.store.record_execution(
            &job.id,
            status,
            duration_ms,
            error.as_deref(),
            next_run_at,
        ) {
            log::error!("Scheduler: failed to record execution of '{}': {}", job.id, err);
        }

        if log::log_enabled!(log::Level::Info) {
            log::info!(
                "Scheduler: job '{}' finished with status {} in {}ms",
                job.id,
                status,
                duration_ms
            );
        }

        self.executing
            .lock()
            .expect("executing set poisoned")
            .remove(&job.id);
    }

    async fn execute_with_retries(&self, job: &CronJobRecord) -> Result<String, EngineError> {
        let mut attempt = 0u32;
        loop {
            match self.execute_payload(job).await {
                Ok(output) => return Ok(output),
                Err(err) if attempt < job.retry_count => {
                    let backoff = Duration::from_secs(1u64 << attempt.min(6));
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!(
                            "Scheduler: job '{}' attempt {} failed ({}), retrying in {:?}",
                            job.id,
                            attempt + 1,
                            err,
                            backoff
                        );
                    }
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_payload(&self, job: &CronJobRecord) -> Result<String, EngineError> {
        match JobPayload::from_parts(&job.payload_kind, &job.payload) {
            JobPayload::Prompt(prompt) => self.run_prompt(job, &prompt).await,
            JobPayload::Skill(tool_name) => self.run_skill(job, &tool_name).await,
            JobPayload::Pipeline(pipeline_name) => {
                let runner = self
                    .pipelines
                    .lock()
                    .expect("pipeline registry poisoned")
                    .get(&pipeline_name)
                    .cloned();
                match runner {
                    Some(runner) => runner.run(job).await,
                    None => Err(EngineError::Other(format!(
                        "no pipeline registered under '{}'",
                        pipeline_name
                    ))),
                }
            }
        }
    }

    async fn run_prompt(&self, job: &CronJobRecord, prompt: &str) -> Result<String, EngineError> {
        let mode = SessionMode::parse(&job.session_mode);
        let session_id = self.session_for_job(job, mode)?;

        let result = self
            .engine
            .send_message(&session_id, prompt, SendOptions::default())
            .await;

        if mode == SessionMode::Isolated {
            if let Err(err) = self.engine.end_session(&session_id) {
                log::warn!("Scheduler: failed to end isolated session: {}", err);
            }
        }
        result.map(|response| response.content)
    }

    fn session_for_job(
        &self,
        job: &CronJobRecord,
        mode: SessionMode,
    ) -> Result<String, EngineError> {
        if mode != SessionMode::Isolated {
            let sessions = self.job_sessions.lock().expect("job session map poisoned");
            if let Some(session_id) = sessions.get(&job.id) {
                if let Some(session) = self.store.get_session(session_id)? {
                    if session.status == SessionStatus::Active {
                        return Ok(session_id.clone());
                    }
                }
            }
        }
        let session = self.store.create_session(NewSession {
            agent_id: job.agent_id.clone(),
            session_type: Some(SessionType::Cron),
            title: Some(format!("cron: {}", job.name)),
            metadata: Some(serde_json::json!({ "cron_job_id": job.id })),
            ..Default::default()
        })?;
        if mode != SessionMode::Isolated {
            self.job_sessions
                .lock()
                .expect("job session map poisoned")
                .insert(job.id.clone(), session.id.clone());
        }
        Ok(session.id)
    }

    async fn run_skill(&self, job: &CronJobRecord, tool_name: &str) -> Result<String, EngineError> {
        let call_id = format!("cron-{}-{}", job.id, Utc::now().timestamp_millis());
        let result = self
            .tools
            .execute(&call_id, tool_name, "{}", &ToolInvocation::default())
            .await?;
        if result.success {
            Ok(result.content)
        } else {
            Err(EngineError::Other(format!(
                "skill '{}' failed: {}",
                tool_name, result.content
            )))
        }
    }
}
