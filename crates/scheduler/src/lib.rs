pub mod triggers;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use triggers::{
    default_anomaly_detector, AnomalyDetector, AsyncJob, BoxFuture, CronTrigger, EventAction,
    EventCondition, HeartbeatEndpoint, HeartbeatHandler, HeartbeatTrigger,
};

/// Combines three trigger styles behind one scheduler, matching the
/// "cron timing + heartbeat polling + in-process event bus" design the
/// system is built around:
///
/// - Cron: fire at scheduled wall-clock times.
/// - Heartbeat: poll at a fixed interval, only act on detected anomalies.
/// - Event: synchronous condition-gated dispatch when something emits.
pub struct HybridScheduler {
    cron_jobs: HashMap<String, (CronTrigger, AsyncJob)>,
    heartbeat_jobs: HashMap<String, HeartbeatTrigger>,
    event_handlers: HashMap<String, Vec<(EventCondition, EventAction)>>,
    running: Arc<Mutex<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for HybridScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridScheduler {
    pub fn new() -> Self {
        Self {
            cron_jobs: HashMap::new(),
            heartbeat_jobs: HashMap::new(),
            event_handlers: HashMap::new(),
            running: Arc::new(Mutex::new(false)),
            tasks: Vec::new(),
        }
    }

    pub fn schedule_cron(&mut self, name: impl Into<String>, expr: &str, job: AsyncJob) -> Result<()> {
        let name = name.into();
        let trigger = CronTrigger::new(name.clone(), expr)?;
        tracing::info!(name = %trigger.name, expr, "registered cron job");
        self.cron_jobs.insert(name, (trigger, job));
        Ok(())
    }

    pub fn schedule_daily(&mut self, name: impl Into<String>, hour: u32, minute: u32, job: AsyncJob) -> Result<()> {
        let expr = format!("0 {minute} {hour} * * *");
        self.schedule_cron(name, &expr, job)
    }

    pub fn schedule_hourly(&mut self, name: impl Into<String>, minute: u32, job: AsyncJob) -> Result<()> {
        let expr = format!("0 {minute} * * * *");
        self.schedule_cron(name, &expr, job)
    }

    pub fn register_heartbeat(
        &mut self,
        name: impl Into<String>,
        interval: std::time::Duration,
        endpoint: HeartbeatEndpoint,
        handler: HeartbeatHandler,
        anomaly_detector: Option<AnomalyDetector>,
    ) {
        let name = name.into();
        tracing::info!(%name, interval_secs = interval.as_secs(), "registered heartbeat");
        self.heartbeat_jobs.insert(
            name.clone(),
            HeartbeatTrigger {
                name,
                interval,
                endpoint,
                handler,
                anomaly_detector: anomaly_detector.unwrap_or_else(default_anomaly_detector),
            },
        );
    }

    pub fn register_event(&mut self, event_type: impl Into<String>, condition: EventCondition, action: EventAction) {
        let event_type = event_type.into();
        tracing::info!(%event_type, "registered event handler");
        self.event_handlers.entry(event_type).or_default().push((condition, action));
    }

    /// Synchronously checks each registered handler's condition and spawns
    /// the matching actions; does not block on their completion.
    pub fn emit_event(&self, event_type: &str, data: Value) {
        let Some(handlers) = self.event_handlers.get(event_type) else {
            return;
        };
        let mut triggered = 0usize;
        for (condition, action) in handlers {
            if condition(&data) {
                let action = action.clone();
                let data = data.clone();
                tokio::spawn(async move {
                    if let Err(err) = action(data).await {
                        tracing::error!(error = %err, "event action failed");
                    }
                });
                triggered += 1;
            }
        }
        if triggered > 0 {
            tracing::debug!(event_type, triggered, "event dispatched");
        }
    }

    pub async fn start(&mut self) {
        *self.running.lock().await = true;
        tracing::info!("scheduler starting");

        for (name, (trigger, job)) in self.cron_jobs.clone_for_run() {
            let running = self.running.clone();
            let handle = tokio::spawn(run_cron_job(name, trigger, job, running));
            self.tasks.push(handle);
        }

        for (name, trigger) in self.heartbeat_jobs.clone() {
            let running = self.running.clone();
            let handle = tokio::spawn(run_heartbeat_job(name, trigger, running));
            self.tasks.push(handle);
        }
    }

    pub async fn stop(&mut self) {
        *self.running.lock().await = false;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            cron_jobs: self.cron_jobs.keys().cloned().collect(),
            heartbeat_jobs: self.heartbeat_jobs.keys().cloned().collect(),
            event_types: self.event_handlers.keys().cloned().collect(),
            active_tasks: self.tasks.len(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SchedulerStatus {
    pub cron_jobs: Vec<String>,
    pub heartbeat_jobs: Vec<String>,
    pub event_types: Vec<String>,
    pub active_tasks: usize,
}

/// Helper trait so `start()` can clone out the job maps without requiring
/// `AsyncJob`/`CronTrigger` to implement `Copy`.
trait CloneForRun {
    fn clone_for_run(&self) -> Vec<(String, (CronTrigger, AsyncJob))>;
}

impl CloneForRun for HashMap<String, (CronTrigger, AsyncJob)> {
    fn clone_for_run(&self) -> Vec<(String, (CronTrigger, AsyncJob))> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

async fn run_cron_job(name: String, trigger: CronTrigger, job: AsyncJob, running: Arc<Mutex<bool>>) {
    loop {
        if !*running.lock().await {
            break;
        }

        let wait = trigger.next_wait_seconds(Utc::now()).unwrap_or(3600.0).max(0.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;

        if !*running.lock().await {
            break;
        }

        tracing::debug!(%name, "firing cron job");
        if let Err(err) = job().await {
            tracing::error!(%name, error = %err, "cron job failed");
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
    }
}

async fn run_heartbeat_job(name: String, trigger: HeartbeatTrigger, running: Arc<Mutex<bool>>) {
    loop {
        if !*running.lock().await {
            break;
        }

        let briefing = match &trigger.endpoint {
            HeartbeatEndpoint::Func(f) => f().await,
            HeartbeatEndpoint::Http(url) => fetch_http_briefing(url).await,
        };

        match briefing {
            Ok(data) => {
                if (trigger.anomaly_detector)(&data) {
                    tracing::warn!(%name, "heartbeat detected anomaly");
                    if let Err(err) = (trigger.handler)(data).await {
                        tracing::error!(%name, error = %err, "heartbeat handler failed");
                    }
                }
            }
            Err(err) => tracing::error!(%name, error = %err, "heartbeat fetch failed"),
        }

        tokio::time::sleep(trigger.interval).await;
    }
}

async fn fetch_http_briefing(url: &str) -> Result<Value> {
    let resp = reqwest::get(url).await?.error_for_status()?;
    Ok(resp.json::<Value>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_dispatch_only_runs_matching_handlers() {
        let mut scheduler = HybridScheduler::new();
        let fired = Arc::new(Mutex::new(false));

        let fired_clone = fired.clone();
        scheduler.register_event(
            "price",
            Arc::new(|data: &Value| data.get("big").is_some()),
            Arc::new(move |_data| {
                let fired = fired_clone.clone();
                Box::pin(async move {
                    *fired.lock().await = true;
                    Ok(())
                })
            }),
        );

        scheduler.emit_event("price", serde_json::json!({"small": true}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!*fired.lock().await);

        scheduler.emit_event("price", serde_json::json!({"big": true}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(*fired.lock().await);
    }

    #[test]
    fn default_anomaly_detector_flags_large_price_change() {
        let detector = default_anomaly_detector();
        assert!(detector(&serde_json::json!({"price_change": 0.2})));
        assert!(!detector(&serde_json::json!({"price_change": 0.05})));
    }
}
