//! Unix domain socket connection handling and command dispatch.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::warn;

use meridian_agent::AgentEvent;
use meridian_memory::MemoryTier;

use crate::{BackendEvent, ClientCommand, ConversationTurn, ServerEvent};

use super::DaemonState;

const SESSION_ID: &str = "default";

pub(super) async fn handle_connection(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    let command: ClientCommand = serde_json::from_str(line.trim())?;
    let event_tx = state.lock().await.event_tx.clone();

    match command {
        ClientCommand::Subscribe => {
            let mut rx = event_tx.subscribe();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if send_event(&mut write_half, ServerEvent::Backend(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(n, "subscribe client lagged; {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            return Ok(());
        }
        ClientCommand::SubmitTurn { user } => {
            for (key, value, category) in crate::micro_profile::extract_inline_profile_signals(&user) {
                let s = state.lock().await;
                let mut memory = s.runtime.memory.lock().await;
                if let Err(err) = memory.record_user_profile_keyed(&key, &value, &category).await {
                    warn!(?err, key, "failed to record inline profile signal");
                }
            }

            let supervisor = { state.lock().await.runtime.supervisor.clone() };
            let mut rx = supervisor.handle(user.clone(), SESSION_ID.to_string());

            let mut assistant_reply = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::Text(chunk) => {
                        assistant_reply.push_str(&chunk);
                        let _ = send_event(&mut write_half, ServerEvent::Backend(BackendEvent::Token(chunk.clone()))).await;
                        let _ = event_tx.send(BackendEvent::Token(chunk));
                    }
                    AgentEvent::NeedInput { prompt, .. } => {
                        let _ = send_event(&mut write_half, ServerEvent::Backend(BackendEvent::Token(format!("{prompt}\n")))).await;
                    }
                }
            }

            {
                let mut s = state.lock().await;
                s.last_turn_at = Some(Utc::now());
                s.recent_turns.push_back(ConversationTurn { user: user.clone(), assistant: assistant_reply });
                while s.recent_turns.len() > 8 {
                    let _ = s.recent_turns.pop_front();
                }
                s.turn_count += 1;

                let mut memory = s.runtime.memory.lock().await;
                let follow_ups = memory.pending_follow_up_ids();
                if !follow_ups.is_empty() {
                    let ids: Vec<_> = follow_ups.iter().map(|(id, _)| *id).collect();
                    if let Err(err) = memory.consume_follow_ups(&ids).await {
                        warn!(?err, "failed to consume delivered follow-ups");
                    }
                }
                let _ = memory.flush_all();
            }

            send_event(&mut write_half, ServerEvent::Backend(BackendEvent::MemoryUpdated)).await?;
            send_event(&mut write_half, ServerEvent::Backend(BackendEvent::Done)).await?;
            let _ = event_tx.send(BackendEvent::Done);
        }
        ClientCommand::GetStatus => {
            let state = state.lock().await;
            send_event(&mut write_half, ServerEvent::Status(state.status())).await?;
        }
        ClientCommand::GetMemoryPeek { limit } => {
            let state = state.lock().await;
            let memory = state.runtime.memory.lock().await;
            let peek = memory.recent(limit.max(1)).into_iter().map(|entry| entry.content.clone()).collect::<Vec<_>>();
            send_event(&mut write_half, ServerEvent::MemoryPeek(peek)).await?;
        }
        ClientCommand::ExecuteTool { name, args } => {
            let state = state.lock().await;
            let _ = event_tx.send(BackendEvent::ToolCallStart(crate::events::ToolCallInfo {
                name: name.clone(),
                args: serde_json::to_string(&args).unwrap_or_default(),
            }));
            let result = state.runtime.tool_executor.execute(&state.runtime.registry, &name, args).await;
            let _ = event_tx.send(BackendEvent::ToolCallEnd(crate::events::ToolResult {
                name: name.clone(),
                success: result.success,
                output: result.output.clone(),
            }));
            let outcome_text = format!(
                "Tool '{}' {}: {}",
                name,
                if result.success { "succeeded" } else { "failed" },
                result.output
            );
            {
                let mut memory = state.runtime.memory.lock().await;
                if let Err(err) = memory.record(MemoryTier::Procedural, outcome_text, format!("tool-execution:{name}")).await {
                    warn!(?err, tool = %name, "failed to record tool outcome to procedural memory");
                }
            }
            send_event(&mut write_half, ServerEvent::ToolResult { success: result.success, output: result.output }).await?;
        }
        ClientCommand::ListTools => {
            let state = state.lock().await;
            send_event(&mut write_half, ServerEvent::ToolList(state.runtime.registry.list_tools())).await?;
        }
        ClientCommand::ReloadConfig => {
            send_event(&mut write_half, ServerEvent::Ack("config reload requires a daemon restart".to_string())).await?;
        }
        ClientCommand::Shutdown => {
            let _ = shutdown_tx.send(true);
            send_event(&mut write_half, ServerEvent::Ack("shutdown requested".to_string())).await?;
        }
        ClientCommand::Ping => {
            send_event(&mut write_half, ServerEvent::Ack("pong".to_string())).await?;
        }
        ClientCommand::RunConsolidation => {
            let state = state.lock().await;
            let mut memory = state.runtime.memory.lock().await;
            let msg = match memory.run_sleep_cycle().await {
                Ok(summary) => {
                    let _ = memory.flush_all();
                    format!("consolidation complete: {}", summary.distilled)
                }
                Err(err) => format!("consolidation failed: {err}"),
            };
            send_event(&mut write_half, ServerEvent::Ack(msg)).await?;
        }
    }

    Ok(())
}

async fn send_event(writer: &mut tokio::net::unix::OwnedWriteHalf, event: ServerEvent) -> Result<()> {
    let encoded = serde_json::to_string(&event)?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
