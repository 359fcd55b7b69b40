//! Unix-socket daemon: binds the listener, assembles shared state, wires
//! scheduled background jobs, and dispatches each connection.

mod connection;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

use meridian_config::AppConfig;

use crate::events::BackendEvent;
use crate::runtime::{AgentRuntime, ConversationTurn};

pub(crate) struct DaemonState {
    pub runtime: Arc<AgentRuntime>,
    pub recent_turns: VecDeque<ConversationTurn>,
    pub turn_count: u64,
    pub started_at: Instant,
    pub last_turn_at: Option<chrono::DateTime<chrono::Utc>>,
    pub event_tx: broadcast::Sender<BackendEvent>,
}

impl DaemonState {
    fn status(&self) -> crate::commands::DaemonStatus {
        let stats = self.runtime.memory.try_lock().map(|m| m.stats());
        let open_tasks = self
            .runtime
            .task_manager
            .lock()
            .map(|tm| tm.get_pending_tasks(usize::MAX).len())
            .unwrap_or(0);
        crate::commands::DaemonStatus {
            agent_name: self.runtime.config.agent.name.clone(),
            provider: self.runtime.config.llm.provider.clone(),
            primary_model: self.runtime.config.llm.primary_model.clone(),
            memory_total: stats.as_ref().map(|s| s.total).unwrap_or(0),
            memory_core: stats.as_ref().map(|s| s.core).unwrap_or(0),
            memory_user_profile: stats.as_ref().map(|s| s.user_profile).unwrap_or(0),
            memory_reflective: stats.as_ref().map(|s| s.reflective).unwrap_or(0),
            memory_semantic: stats.as_ref().map(|s| s.semantic).unwrap_or(0),
            memory_episodic: stats.as_ref().map(|s| s.episodic).unwrap_or(0),
            open_tasks,
            uptime_secs: self.started_at.elapsed().as_secs(),
            available_tools: self.runtime.registry.list_tools().into_iter().map(|s| s.name).collect(),
        }
    }
}

/// Spawns the background jobs every running daemon keeps alive: periodic
/// memory consolidation on a cron schedule, and an overdue-task heartbeat,
/// both driven by [`meridian_scheduler::HybridScheduler`] rather than
/// hand-rolled `tokio::spawn` loops with manual rate-limit bookkeeping.
async fn schedule_background_jobs(state: Arc<Mutex<DaemonState>>) -> Result<()> {
    let (runtime, consolidation_hours) = {
        let s = state.lock().await;
        (Arc::clone(&s.runtime), s.runtime.config.memory.auto_consolidation_interval_hours.max(1))
    };

    let mut scheduler = runtime.scheduler.lock().await;

    let consolidation_state = Arc::clone(&state);
    scheduler.schedule_cron(
        "memory-consolidation",
        &format!("0 0 */{consolidation_hours} * * *"),
        Arc::new(move || {
            let state = Arc::clone(&consolidation_state);
            Box::pin(async move {
                let s = state.lock().await;
                let recently_active =
                    s.last_turn_at.map(|t| (chrono::Utc::now() - t).num_minutes() < 5).unwrap_or(false);
                if recently_active {
                    return Ok(());
                }
                let mut memory = s.runtime.memory.lock().await;
                match memory.run_sleep_cycle().await {
                    Ok(summary) => info!(promoted = summary.promoted_ids.len(), "scheduled memory consolidation complete"),
                    Err(err) => warn!(?err, "scheduled memory consolidation failed"),
                }
                let _ = memory.flush_all();
                let _ = s.event_tx.send(BackendEvent::MemoryUpdated);
                Ok(())
            })
        }),
    )?;

    let overdue_state = Arc::clone(&state);
    let overdue_handler_state = Arc::clone(&state);
    scheduler.register_heartbeat(
        "task-overdue-sweep",
        std::time::Duration::from_secs(runtime.config.scheduler.heartbeat_interval_secs.max(60)),
        meridian_scheduler::triggers::HeartbeatEndpoint::Func(Arc::new(move || {
            let state = Arc::clone(&overdue_state);
            Box::pin(async move {
                let s = state.lock().await;
                let overdue = s.runtime.task_manager.lock().map(|tm| tm.get_overdue_tasks().len()).unwrap_or(0);
                Ok(serde_json::json!({ "overdue": overdue }))
            })
        })),
        Arc::new(move |data: serde_json::Value| {
            let state = Arc::clone(&overdue_handler_state);
            Box::pin(async move {
                let overdue = data.get("overdue").and_then(|v| v.as_u64()).unwrap_or(0);
                let s = state.lock().await;
                let _ = s.event_tx.send(BackendEvent::Token(format!("note: {overdue} task(s) overdue\n")));
                Ok(())
            })
        }),
        Some(Arc::new(|data: &serde_json::Value| {
            data.get("overdue").and_then(|v| v.as_u64()).unwrap_or(0) > 0
        })),
    );

    scheduler.start();
    Ok(())
}

pub async fn run_unified_daemon(config: AppConfig, memory_log_path: &Path, socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    let runtime = Arc::new(AgentRuntime::init(config, memory_log_path).await?);
    let (event_tx, _) = broadcast::channel(256);

    let state = Arc::new(Mutex::new(DaemonState {
        runtime,
        recent_turns: VecDeque::new(),
        turn_count: 0,
        started_at: Instant::now(),
        last_turn_at: None,
        event_tx,
    }));

    schedule_background_jobs(Arc::clone(&state)).await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path.display(), "daemon listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = Arc::clone(&state);
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = connection::handle_connection(stream, state, shutdown_tx).await {
                        warn!(?err, "connection handling failed");
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    {
        let s = state.lock().await;
        s.runtime.scheduler.lock().await.stop();
        let mut memory = s.runtime.memory.lock().await;
        let _ = memory.flush_all();
    }
    let _ = std::fs::remove_file(socket_path);
    info!("daemon shut down cleanly");
    Ok(())
}
