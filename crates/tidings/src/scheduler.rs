use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, TimeZone, Utc,
};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::ContentType;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Day-of-month ceiling for monthly schedules, avoiding month-length
/// edge cases.
const MONTHLY_DAY_CLAMP: u32 = 28;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job ID '{0}' already exists.")]
    JobIdExists(String),
    #[error("Job ID '{0}' not found.")]
    JobNotFound(String),
    #[error("Invalid schedule: {0}")]
    Invalid(String),
    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),
    #[error("Failed to persist schedules: {0}")]
    PersistError(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::PersistError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Email,
    Whatsapp,
}

impl DeliveryMethod {
    /// Auto-detect from the recipient shape: an `@` means email,
    /// anything else is a messaging identifier.
    pub fn detect(recipient: &str) -> Self {
        if recipient.contains('@') {
            DeliveryMethod::Email
        } else {
            DeliveryMethod::Whatsapp
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMethod::Email => f.write_str("email"),
            DeliveryMethod::Whatsapp => f.write_str("whatsapp"),
        }
    }
}

/// Wall-clock time of day, validated to `00:00`–`23:59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobTime {
    hour: u8,
    minute: u8,
}

impl JobTime {
    pub fn parse(time: &str) -> Result<Self, SchedulerError> {
        let Some((hour, minute)) = time.split_once(':') else {
            return Err(SchedulerError::Invalid(format!(
                "time '{time}' is not in HH:MM format"
            )));
        };
        let hour: u8 = hour
            .parse()
            .map_err(|_| SchedulerError::Invalid(format!("invalid hour in '{time}'")))?;
        let minute: u8 = minute
            .parse()
            .map_err(|_| SchedulerError::Invalid(format!("invalid minute in '{time}'")))?;
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::Invalid(format!(
                "time '{time}' is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or_default()
    }
}

impl fmt::Display for JobTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl TryFrom<String> for JobTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobTime::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<JobTime> for String {
    fn from(time: JobTime) -> Self {
        time.to_string()
    }
}

/// A durable recurring digest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub schedule_type: ScheduleType,
    pub time: JobTime,
    pub recipient: String,
    pub delivery_method: DeliveryMethod,
    pub digest_type: String,
    #[serde(default)]
    pub content_types: Option<Vec<ContentType>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub active: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub schedule_type: ScheduleType,
    pub time: String,
    pub recipient: String,
    pub delivery_method: Option<DeliveryMethod>,
    pub digest_type: String,
    pub content_types: Option<Vec<ContentType>>,
    pub tags: Option<Vec<String>>,
}

/// Partial-field update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub schedule_type: Option<ScheduleType>,
    pub time: Option<String>,
    pub recipient: Option<String>,
    pub delivery_method: Option<DeliveryMethod>,
    pub digest_type: Option<String>,
    pub content_types: Option<Vec<ContentType>>,
    pub tags: Option<Vec<String>>,
    pub active: Option<bool>,
}

/// Task data handed to a digest callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestTask {
    pub digest_id: String,
    pub digest_type: String,
    pub recipient: String,
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub content_types: Option<Vec<ContentType>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

pub type TaskCallback =
    Arc<dyn Fn(DigestTask) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Default location for the durable job table
/// (e.g. ~/.local/share/tidings/schedules.json on Linux).
pub fn default_storage_path() -> Result<PathBuf, std::io::Error> {
    use etcetera::{choose_app_strategy, AppStrategy};
    let strategy = choose_app_strategy(crate::config::APP_STRATEGY.clone())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
    let data_dir = strategy.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join("schedules.json"))
}

fn at(date: NaiveDate, time: JobTime) -> NaiveDateTime {
    date.and_time(time.as_naive_time())
}

fn next_month_clamped(now: NaiveDateTime, time: JobTime) -> NaiveDateTime {
    let mut year = now.year();
    let mut month = now.month() + 1;
    if month > 12 {
        month = 1;
        year += 1;
    }
    let day = now.day().min(MONTHLY_DAY_CLAMP);
    let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| now.date());
    at(date, time)
}

/// First run for a new job: today at HH:MM when that is still in the
/// future, otherwise one period out.
pub fn initial_next_run(
    schedule_type: ScheduleType,
    time: JobTime,
    now: NaiveDateTime,
) -> NaiveDateTime {
    let anchor = at(now.date(), time);
    if anchor > now {
        return anchor;
    }
    match schedule_type {
        ScheduleType::Daily => anchor + ChronoDuration::days(1),
        ScheduleType::Weekly => anchor + ChronoDuration::days(7),
        ScheduleType::Monthly => next_month_clamped(now, time),
    }
}

/// The run after a completed execution at `now`.
pub fn next_run_after(
    schedule_type: ScheduleType,
    time: JobTime,
    now: NaiveDateTime,
) -> NaiveDateTime {
    let anchor = at(now.date(), time);
    match schedule_type {
        ScheduleType::Daily => anchor + ChronoDuration::days(1),
        ScheduleType::Weekly => anchor + ChronoDuration::days(7),
        ScheduleType::Monthly => next_month_clamped(now, time),
    }
}

/// Interpret a local wall-clock datetime as UTC. DST ambiguity resolves
/// to the earlier instant; a nonexistent time slides forward an hour.
fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => match Local.from_local_datetime(&(naive + ChronoDuration::hours(1))) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => Utc::now(),
        },
    }
}

/// Persistence contract for scheduled jobs.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: ScheduledJob) -> Result<(), SchedulerError>;

    async fn get(&self, id: &str) -> Result<Option<ScheduledJob>, SchedulerError>;

    async fn list(&self, active_only: bool) -> Result<Vec<ScheduledJob>, SchedulerError>;

    async fn update(&self, job: ScheduledJob) -> Result<(), SchedulerError>;

    async fn delete(&self, id: &str) -> Result<bool, SchedulerError>;

    /// Active jobs whose `next_run` is at or before `now`.
    async fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, SchedulerError>;

    async fn set_last_run(
        &self,
        id: &str,
        ts: DateTime<Utc>,
        success: bool,
    ) -> Result<(), SchedulerError>;
}

/// In-memory job store for tests and embedding.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: ScheduledJob) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::JobIdExists(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ScheduledJob>, SchedulerError> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| !active_only || j.active)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn update(&self, job: ScheduledJob) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains_key(&job.id) {
            return Err(SchedulerError::JobNotFound(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.jobs.lock().await.remove(id).is_some())
    }

    async fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, SchedulerError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.active && j.next_run <= now)
            .cloned()
            .collect())
    }

    async fn set_last_run(
        &self,
        id: &str,
        ts: DateTime<Utc>,
        success: bool,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        job.last_run = Some(ts);
        job.updated_at = ts;
        if !success {
            tracing::warn!("Job '{}' last run was not successful", id);
        }
        Ok(())
    }
}

/// File-backed job store: the full job table serialized as pretty JSON,
/// rewritten on every mutation.
pub struct JsonFileJobStore {
    path: PathBuf,
    inner: MemoryJobStore,
}

impl JsonFileJobStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SchedulerError> {
        let path = path.into();
        let inner = MemoryJobStore::new();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let jobs: Vec<ScheduledJob> = serde_json::from_str(&data)?;
            let mut guard = inner.jobs.lock().await;
            for job in jobs {
                guard.insert(job.id.clone(), job);
            }
        }
        Ok(Self { path, inner })
    }

    async fn persist(&self) -> Result<(), SchedulerError> {
        let jobs: Vec<ScheduledJob> = self.inner.jobs.lock().await.values().cloned().collect();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&jobs)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for JsonFileJobStore {
    async fn insert(&self, job: ScheduledJob) -> Result<(), SchedulerError> {
        self.inner.insert(job).await?;
        self.persist().await
    }

    async fn get(&self, id: &str) -> Result<Option<ScheduledJob>, SchedulerError> {
        self.inner.get(id).await
    }

    async fn list(&self, active_only: bool) -> Result<Vec<ScheduledJob>, SchedulerError> {
        self.inner.list(active_only).await
    }

    async fn update(&self, job: ScheduledJob) -> Result<(), SchedulerError> {
        self.inner.update(job).await?;
        self.persist().await
    }

    async fn delete(&self, id: &str) -> Result<bool, SchedulerError> {
        let deleted = self.inner.delete(id).await?;
        if deleted {
            self.persist().await?;
        }
        Ok(deleted)
    }

    async fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, SchedulerError> {
        self.inner.due_before(now).await
    }

    async fn set_last_run(
        &self,
        id: &str,
        ts: DateTime<Utc>,
        success: bool,
    ) -> Result<(), SchedulerError> {
        self.inner.set_last_run(id, ts, success).await?;
        self.persist().await
    }
}

/// Durable single-node recurring-job engine. One instance per process,
/// created at startup and stopped at shutdown.
///
/// Every tick (default one minute) it queries jobs due at or before now
/// and launches one execution per job id, skipping ids that are still
/// running. On completion `last_run` is stamped and `next_run` advances
/// whether or not the callback succeeded, so a failing job stays on
/// schedule.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    callbacks: DashMap<String, TaskCallback>,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    loop_state: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>) -> Arc<Self> {
        Self::with_tick_interval(store, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_tick_interval(store: Arc<dyn JobStore>, tick_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            callbacks: DashMap::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
            loop_state: Mutex::new(None),
            tick_interval,
        })
    }

    /// Register the async callback invoked for a task type
    /// (e.g. `digest_daily`).
    pub fn register_callback(&self, task_type: impl Into<String>, callback: TaskCallback) {
        let task_type = task_type.into();
        tracing::info!("Registered callback for task type: {}", task_type);
        self.callbacks.insert(task_type, callback);
    }

    /// Create a job; `next_run` is computed from the schedule and the
    /// current local clock.
    pub async fn schedule(&self, spec: JobSpec) -> Result<ScheduledJob, SchedulerError> {
        let time = JobTime::parse(&spec.time)?;
        let delivery_method = spec
            .delivery_method
            .unwrap_or_else(|| DeliveryMethod::detect(&spec.recipient));

        let now = Utc::now();
        let next_run = local_to_utc(initial_next_run(
            spec.schedule_type,
            time,
            Local::now().naive_local(),
        ));

        let job = ScheduledJob {
            id: Uuid::new_v4().to_string(),
            schedule_type: spec.schedule_type,
            time,
            recipient: spec.recipient,
            delivery_method,
            digest_type: spec.digest_type,
            content_types: spec.content_types,
            tags: spec.tags,
            active: true,
            last_run: None,
            next_run,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(job.clone()).await?;
        tracing::info!(
            "Scheduled {:?} job '{}' at {} (next run {})",
            job.schedule_type,
            job.id,
            job.time,
            job.next_run
        );
        Ok(job)
    }

    /// Merge non-null fields; when the cadence changed and the job is
    /// active, `next_run` is recomputed.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<ScheduledJob, SchedulerError> {
        let mut job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;

        let mut reschedule = false;
        if let Some(schedule_type) = update.schedule_type {
            if schedule_type != job.schedule_type {
                job.schedule_type = schedule_type;
                reschedule = true;
            }
        }
        if let Some(time) = update.time {
            let time = JobTime::parse(&time)?;
            if time != job.time {
                job.time = time;
                reschedule = true;
            }
        }
        if let Some(recipient) = update.recipient {
            job.recipient = recipient;
        }
        if let Some(delivery_method) = update.delivery_method {
            job.delivery_method = delivery_method;
        }
        if let Some(digest_type) = update.digest_type {
            job.digest_type = digest_type;
        }
        if let Some(content_types) = update.content_types {
            job.content_types = Some(content_types);
        }
        if let Some(tags) = update.tags {
            job.tags = Some(tags);
        }
        if let Some(active) = update.active {
            job.active = active;
        }
        job.updated_at = Utc::now();

        if reschedule && job.active {
            job.next_run = local_to_utc(initial_next_run(
                job.schedule_type,
                job.time,
                Local::now().naive_local(),
            ));
        }

        self.store.update(job.clone()).await?;
        Ok(job)
    }

    /// Soft-cancel: deactivate the job and abort any in-flight execution.
    pub async fn cancel(&self, id: &str) -> Result<ScheduledJob, SchedulerError> {
        let job = self
            .update(
                id,
                JobUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        if let Some(handle) = self.running.lock().await.remove(id) {
            handle.abort();
            tracing::info!("Cancelled in-flight execution for job '{}'", id);
        }
        Ok(job)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, SchedulerError> {
        if let Some(handle) = self.running.lock().await.remove(id) {
            handle.abort();
        }
        self.store.delete(id).await
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<ScheduledJob>, SchedulerError> {
        self.store.list(active_only).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledJob>, SchedulerError> {
        self.store.get(id).await
    }

    /// Start the tick loop. Idempotent; a second call warns and returns.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.loop_state.lock().await;
        if state.is_some() {
            tracing::warn!("Scheduler is already running");
            return;
        }
        let token = CancellationToken::new();
        let scheduler = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("Scheduler loop started");
            let mut interval = tokio::time::interval(scheduler.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        tracing::info!("Scheduler loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        scheduler.tick().await;
                    }
                }
            }
        });
        *state = Some((token, handle));
        tracing::info!("Scheduler service started");
    }

    /// Stop the loop and cancel outstanding executions, awaiting each
    /// briefly.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.loop_state.lock().await.take() else {
            tracing::warn!("Scheduler is not running");
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                tracing::error!("Scheduler loop task failed: {}", e);
            }
        }

        let handles: Vec<(String, JoinHandle<()>)> =
            self.running.lock().await.drain().collect();
        for (id, handle) in handles {
            handle.abort();
            match tokio::time::timeout(STOP_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {
                    tracing::info!("Scheduled job '{}' was cancelled", id)
                }
                Ok(Err(e)) => tracing::error!("Scheduled job '{}' task failed: {}", id, e),
                Err(_) => tracing::warn!(
                    "Scheduled job '{}' did not stop within {:?}",
                    id,
                    STOP_GRACE
                ),
            }
        }
        tracing::info!("Scheduler service stopped");
    }

    /// One pass over due jobs. At most one in-flight execution per id.
    async fn tick(self: &Arc<Self>) {
        let due = match self.store.due_before(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Error querying due jobs: {}", e);
                return;
            }
        };

        let mut running = self.running.lock().await;
        for job in due {
            if let Some(handle) = running.get(&job.id) {
                if !handle.is_finished() {
                    continue;
                }
            }
            let scheduler = self.clone();
            let job_id = job.id.clone();
            let handle = tokio::spawn(async move {
                scheduler.execute_job(job).await;
            });
            running.insert(job_id, handle);
        }
    }

    async fn execute_job(self: Arc<Self>, job: ScheduledJob) {
        let task_type = format!("digest_{}", job.digest_type);
        tracing::info!("Executing job {} of type {}", job.id, task_type);

        let task = DigestTask {
            digest_id: job.id.clone(),
            digest_type: job.digest_type.clone(),
            recipient: job.recipient.clone(),
            delivery_method: job.delivery_method,
            content_types: job.content_types.clone(),
            tags: job.tags.clone(),
        };

        let callback = self.callbacks.get(&task_type).map(|c| c.value().clone());
        let result = match callback {
            Some(callback) => callback(task).await,
            None => {
                tracing::error!("No callback registered for task type {}", task_type);
                Err(anyhow::anyhow!("no callback for {task_type}"))
            }
        };

        let success = result.is_ok();
        if let Err(e) = &result {
            tracing::error!("Scheduled job '{}' execution failed: {:#}", job.id, e);
        } else {
            tracing::info!("Scheduled job '{}' completed successfully", job.id);
        }

        // Failure does not deactivate the job: stamp last_run and advance
        // next_run either way so the job stays on schedule.
        let now = Utc::now();
        if let Err(e) = self.store.set_last_run(&job.id, now, success).await {
            tracing::error!("Failed to record last run for job {}: {}", job.id, e);
        }
        let next_run = local_to_utc(next_run_after(
            job.schedule_type,
            job.time,
            Local::now().naive_local(),
        ));
        match self.store.get(&job.id).await {
            Ok(Some(mut current)) => {
                current.next_run = next_run;
                current.updated_at = now;
                if let Err(e) = self.store.update(current).await {
                    tracing::error!("Failed to advance next_run for job {}: {}", job.id, e);
                }
            }
            Ok(None) => {
                tracing::warn!("Job {} disappeared during execution", job.id);
            }
            Err(e) => {
                tracing::error!("Failed to reload job {}: {}", job.id, e);
            }
        }

        self.running.lock().await.remove(&job.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn time(s: &str) -> JobTime {
        JobTime::parse(s).unwrap()
    }

    #[test]
    fn test_job_time_validation() {
        assert!(JobTime::parse("09:00").is_ok());
        assert!(JobTime::parse("23:59").is_ok());
        assert!(JobTime::parse("00:00").is_ok());
        assert!(matches!(
            JobTime::parse("24:00"),
            Err(SchedulerError::Invalid(_))
        ));
        assert!(JobTime::parse("12:60").is_err());
        assert!(JobTime::parse("noon").is_err());
        assert_eq!(time("07:05").to_string(), "07:05");
    }

    #[test]
    fn test_delivery_method_detection() {
        assert_eq!(DeliveryMethod::detect("a@example.com"), DeliveryMethod::Email);
        assert_eq!(DeliveryMethod::detect("+5511999999999"), DeliveryMethod::Whatsapp);
    }

    #[test]
    fn test_daily_initial_next_run() {
        // At 10:00, a daily 09:00 job first runs tomorrow.
        let next = initial_next_run(ScheduleType::Daily, time("09:00"), naive(2025, 6, 10, 10, 0));
        assert_eq!(next, naive(2025, 6, 11, 9, 0));

        // At 08:00 it still runs today.
        let next = initial_next_run(ScheduleType::Daily, time("09:00"), naive(2025, 6, 10, 8, 0));
        assert_eq!(next, naive(2025, 6, 10, 9, 0));
    }

    #[test]
    fn test_daily_rollover_after_run() {
        // Scheduled daily 09:00 at 10:00: first run tomorrow 09:00.
        let now = naive(2025, 6, 10, 10, 0);
        let first = initial_next_run(ScheduleType::Daily, time("09:00"), now);
        assert_eq!(first, naive(2025, 6, 11, 9, 0));

        // After that run executes, the next is the day after at 09:00.
        let after = next_run_after(ScheduleType::Daily, time("09:00"), first);
        assert_eq!(after, naive(2025, 6, 12, 9, 0));
    }

    #[test]
    fn test_weekly_next_run() {
        let next = initial_next_run(ScheduleType::Weekly, time("09:00"), naive(2025, 6, 10, 10, 0));
        assert_eq!(next, naive(2025, 6, 17, 9, 0));

        let after = next_run_after(ScheduleType::Weekly, time("09:00"), naive(2025, 6, 17, 9, 0));
        assert_eq!(after, naive(2025, 6, 24, 9, 0));
    }

    #[test]
    fn test_monthly_clamps_to_day_28() {
        // Scheduled on the 31st: next month lands on the 28th.
        let next = initial_next_run(
            ScheduleType::Monthly,
            time("09:00"),
            naive(2025, 1, 31, 10, 0),
        );
        assert_eq!(next, naive(2025, 2, 28, 9, 0));
    }

    #[test]
    fn test_monthly_december_rolls_into_next_year() {
        let next = next_run_after(
            ScheduleType::Monthly,
            time("09:00"),
            naive(2025, 12, 15, 9, 0),
        );
        assert_eq!(next, naive(2026, 1, 15, 9, 0));
    }

    fn spec(recipient: &str) -> JobSpec {
        JobSpec {
            schedule_type: ScheduleType::Daily,
            time: "09:00".to_string(),
            recipient: recipient.to_string(),
            delivery_method: None,
            digest_type: "daily".to_string(),
            content_types: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_schedule_validates_time_and_detects_delivery() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));

        let mut bad = spec("a@example.com");
        bad.time = "24:00".to_string();
        assert!(matches!(
            scheduler.schedule(bad).await,
            Err(SchedulerError::Invalid(_))
        ));

        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
        assert_eq!(job.delivery_method, DeliveryMethod::Email);
        assert!(job.active);
        assert!(job.next_run > Utc::now());

        let job = scheduler.schedule(spec("+551199999")).await.unwrap();
        assert_eq!(job.delivery_method, DeliveryMethod::Whatsapp);
    }

    #[tokio::test]
    async fn test_update_reschedules_on_time_change() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
        let original_next = job.next_run;

        // Non-cadence update leaves next_run alone.
        let updated = scheduler
            .update(
                &job.id,
                JobUpdate {
                    recipient: Some("b@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.next_run, original_next);
        assert_eq!(updated.recipient, "b@example.com");

        // Cadence change recomputes.
        let updated = scheduler
            .update(
                &job.id,
                JobUpdate {
                    schedule_type: Some(ScheduleType::Weekly),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.schedule_type, ScheduleType::Weekly);
        assert!(updated.next_run >= original_next);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
        assert!(matches!(
            scheduler.update("ghost", JobUpdate::default()).await,
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_deactivates_and_due_excludes() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::new(store.clone());
        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();

        // Force the job due, then cancel it.
        let mut due_job = store.get(&job.id).await.unwrap().unwrap();
        due_job.next_run = Utc::now() - ChronoDuration::minutes(1);
        store.update(due_job).await.unwrap();

        let cancelled = scheduler.cancel(&job.id).await.unwrap();
        assert!(!cancelled.active);
        assert!(store.due_before(Utc::now()).await.unwrap().is_empty());

        let active_only = scheduler.list(true).await.unwrap();
        assert!(active_only.is_empty());
        assert_eq!(scheduler.list(false).await.unwrap().len(), 1);
    }

    async fn make_due(store: &MemoryJobStore, id: &str) {
        let mut job = store.get(id).await.unwrap().unwrap();
        job.next_run = Utc::now() - ChronoDuration::seconds(5);
        store.update(job).await.unwrap();
    }

    #[tokio::test]
    async fn test_due_job_fires_callback_and_advances() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::with_tick_interval(store.clone(), Duration::from_millis(25));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.register_callback(
            "digest_daily",
            Arc::new(move |task: DigestTask| {
                let counter = counter.clone();
                Box::pin(async move {
                    assert_eq!(task.digest_type, "daily");
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
        make_due(&store, &job.id).await;

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop().await;

        // Exactly one run: next_run advanced past now after the first.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert!(stored.last_run.is_some());
        assert!(stored.next_run > Utc::now());
        assert!(stored.active);
    }

    #[tokio::test]
    async fn test_callback_failure_keeps_job_on_schedule() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::with_tick_interval(store.clone(), Duration::from_millis(25));

        scheduler.register_callback(
            "digest_daily",
            Arc::new(|_task: DigestTask| {
                Box::pin(async move { Err(anyhow::anyhow!("delivery exploded")) })
            }),
        );

        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
        make_due(&store, &job.id).await;

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop().await;

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert!(stored.active);
        assert!(stored.last_run.is_some());
        assert!(stored.next_run > Utc::now());
    }

    #[tokio::test]
    async fn test_single_flight_per_job_id() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::with_tick_interval(store.clone(), Duration::from_millis(20));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.register_callback(
            "digest_daily",
            Arc::new(move |_task: DigestTask| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // Outlive several ticks while the job is still due.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
            }),
        );

        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
        make_due(&store, &job.id).await;

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        // The job is still due (next_run advances only on completion) but
        // only one execution may be in flight.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_running_callbacks_quickly() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::with_tick_interval(store.clone(), Duration::from_millis(20));

        let started = Arc::new(tokio::sync::Notify::new());
        let notify = started.clone();
        scheduler.register_callback(
            "digest_daily",
            Arc::new(move |_task: DigestTask| {
                let notify = notify.clone();
                Box::pin(async move {
                    notify.notify_one();
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
            }),
        );

        let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
        make_due(&store, &job.id).await;

        scheduler.start().await;
        started.notified().await;

        let stop_started = std::time::Instant::now();
        scheduler.stop().await;
        assert!(stop_started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_json_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedules.json");

        let id;
        {
            let store = JsonFileJobStore::open(&path).await.unwrap();
            let scheduler = Scheduler::new(Arc::new(store));
            let job = scheduler.schedule(spec("a@example.com")).await.unwrap();
            id = job.id;
        }

        let store = JsonFileJobStore::open(&path).await.unwrap();
        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.recipient, "a@example.com");
        assert_eq!(loaded.schedule_type, ScheduleType::Daily);
        assert!(loaded.active);
    }
}
