use crate::error::SchedulerError;
use crate::job::{HeartbeatSpec, ScheduleJob, SchedulerConfig};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use wayfarer_gateway::{Event, EventSource, Priority};

/// Injected submission sink: each trigger calls this rather than the
/// `EventGateway` directly. Kept as a trait rather than a direct `EventGateway`
/// dependency so the scheduler can be driven by a test double without a
/// real gateway consumer loop.
#[async_trait]
pub trait EventSubmitter: Send + Sync {
    async fn submit(&self, event: Event) -> Result<(), String>;
}

struct HeartbeatEntry {
    spec: HeartbeatSpec,
    timezone: Tz,
}

struct JobEntry {
    job: ScheduleJob,
    timezone: Tz,
}

/// Registers cron-expressed heartbeats and named jobs; one trigger task
/// per registered item is spawned on [`start`](GatewayScheduler::start)
///.
pub struct GatewayScheduler {
    submit_fn: Arc<dyn EventSubmitter>,
    default_timezone: Tz,
    heartbeats: Mutex<Vec<HeartbeatEntry>>,
    jobs: Mutex<Vec<JobEntry>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayScheduler {
    pub fn new(submit_fn: Arc<dyn EventSubmitter>) -> Self {
        Self::with_timezone(submit_fn, "UTC")
    }

    pub fn with_timezone(submit_fn: Arc<dyn EventSubmitter>, timezone: &str) -> Self {
        let tz = parse_timezone(timezone).unwrap_or(chrono_tz::UTC);
        Self {
            submit_fn,
            default_timezone: tz,
            heartbeats: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_heartbeat(&self, spec: HeartbeatSpec) -> Result<(), SchedulerError> {
        validate_cron(&spec.cron)?;
        self.heartbeats.lock().await.push(HeartbeatEntry {
            spec,
            timezone: self.default_timezone,
        });
        Ok(())
    }

    pub async fn add_job(&self, job: ScheduleJob) -> Result<(), SchedulerError> {
        validate_cron(&job.cron)?;
        let timezone = match &job.timezone {
            Some(tz) => parse_timezone(tz)?,
            None => self.default_timezone,
        };
        self.jobs.lock().await.push(JobEntry { job, timezone });
        Ok(())
    }

    /// Parse the `scheduler.*` config tree into heartbeat/job registrations
    ///. A disabled top-level scheduler silently registers
    /// nothing.
    pub async fn add_jobs_from_config(&self, config: &SchedulerConfig) -> Result<(), SchedulerError> {
        if !config.enabled {
            tracing::info!("scheduler disabled in config, registering nothing");
            return Ok(());
        }
        if config.heartbeat.enabled {
            if let Some(cron) = &config.heartbeat.cron {
                let prompt = config.heartbeat.prompt.clone().unwrap_or_default();
                self.add_heartbeat(HeartbeatSpec {
                    enabled: true,
                    cron: cron.clone(),
                    prompt: crate::job::HeartbeatPrompt::Static(prompt),
                })
                .await?;
            }
        }
        for job_cfg in &config.jobs {
            self.add_job(ScheduleJob::from(job_cfg.clone())).await?;
        }
        Ok(())
    }

    /// Install one trigger task per registered heartbeat/job.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(SchedulerError::AlreadyRunning);
        }

        for entry in self.heartbeats.lock().await.iter() {
            if !entry.spec.enabled {
                continue;
            }
            let schedule = compile(&entry.spec.cron)?;
            let submit_fn = Arc::clone(&self.submit_fn);
            let tz = entry.timezone;
            let prompt = entry.spec.prompt.clone();
            handles.push(tokio::spawn(async move {
                trigger_loop(schedule, tz, submit_fn, move || heartbeat_event(prompt.resolve())).await;
            }));
        }

        for entry in self.jobs.lock().await.iter() {
            if !entry.job.enabled {
                tracing::debug!(job_id = %entry.job.id, "skipping disabled job");
                continue;
            }
            let schedule = compile(&entry.job.cron)?;
            let submit_fn = Arc::clone(&self.submit_fn);
            let tz = entry.timezone;
            let job = entry.job.clone();
            handles.push(tokio::spawn(async move {
                trigger_loop(schedule, tz, submit_fn, move || job_event(&job)).await;
            }));
        }

        Ok(())
    }

    /// Abort every trigger task. In-flight submissions are not awaited;
    /// the scheduler itself holds no queue to drain — callers
    /// that need a clean shutdown stop the downstream gateway first.
    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

fn compile(expr: &str) -> Result<Schedule, SchedulerError> {
    Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

fn validate_cron(expr: &str) -> Result<(), SchedulerError> {
    compile(expr).map(|_| ())
}

fn parse_timezone(tz: &str) -> Result<Tz, SchedulerError> {
    Tz::from_str(tz).map_err(|_| SchedulerError::UnknownTimezone(tz.to_string()))
}

async fn trigger_loop<F>(schedule: Schedule, tz: Tz, submit_fn: Arc<dyn EventSubmitter>, make_event: F)
where
    F: Fn() -> Event + Send + 'static,
{
    loop {
        let now = Utc::now().with_timezone(&tz);
        let next = match schedule.after(&now).next() {
            Some(next) => next,
            None => {
                tracing::warn!("cron schedule has no further fire times, stopping trigger");
                return;
            }
        };
        let wait = (next.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;

        let event = make_event();
        if let Err(e) = submit_fn.submit(event).await {
            tracing::warn!(error = %e, "scheduler failed to submit event");
        }
    }
}

fn heartbeat_event(prompt: String) -> Event {
    Event::new(EventSource::Heartbeat, Priority::Low, prompt).with_call_type("heartbeat")
}

fn job_event(job: &ScheduleJob) -> Event {
    let mut event = Event::new(EventSource::Scheduled, Priority::Normal, job.prompt.clone())
        .with_call_type(job.call_type.clone().unwrap_or_else(|| "scheduled".to_string()));
    if let Some(channel) = &job.channel {
        event = event.with_channel(channel.clone());
    }
    for (k, v) in &job.metadata {
        event = event.with_metadata(k.clone(), v.clone());
    }
    event.with_metadata("job_id", serde_json::Value::String(job.id.clone()))
}
