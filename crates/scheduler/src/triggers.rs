use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde_json::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type AsyncJob = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type AnomalyDetector = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type HeartbeatHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Full cron-expression parsing via the `cron` crate. Six fields:
/// `sec min hour day month dow`.
#[derive(Clone)]
pub struct CronTrigger {
    pub name: String,
    schedule: Schedule,
}

impl CronTrigger {
    pub fn new(name: impl Into<String>, expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expr)
            .with_context(|| format!("invalid cron expression: {expr}"))?;
        Ok(Self { name: name.into(), schedule })
    }

    /// Seconds to wait before the next scheduled fire, from `now`.
    pub fn next_wait_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.schedule
            .after(&now)
            .next()
            .map(|next| (next - now).num_milliseconds() as f64 / 1000.0)
    }
}

/// Low-power standby that wakes on a fixed interval, checks a briefing for
/// anomalies, and only invokes the handler when the detector fires.
#[derive(Clone)]
pub struct HeartbeatTrigger {
    pub name: String,
    pub interval: std::time::Duration,
    pub endpoint: HeartbeatEndpoint,
    pub handler: HeartbeatHandler,
    pub anomaly_detector: AnomalyDetector,
}

#[derive(Clone)]
pub enum HeartbeatEndpoint {
    Http(String),
    Func(Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>),
}

pub fn default_anomaly_detector() -> AnomalyDetector {
    Arc::new(|data: &Value| {
        let price_change = data.get("price_change").and_then(Value::as_f64).unwrap_or(0.0);
        let error_count = data.get("error_count").and_then(Value::as_u64).unwrap_or(0);
        price_change.abs() > 0.15 || error_count > 10
    })
}

pub type EventCondition = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type EventAction = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_expression_at_construction() {
        assert!(CronTrigger::new("bad", "not a cron expr").is_err());
    }

    #[test]
    fn valid_expression_has_a_next_fire_time() {
        let trigger = CronTrigger::new("hourly", "0 0 * * * *").unwrap();
        assert!(trigger.next_wait_seconds(Utc::now()).unwrap() >= 0.0);
    }
}
