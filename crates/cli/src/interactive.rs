use std::io;

use anyhow::Result;

use meridian_config::AppConfig;
use meridian_runtime::{BackendEvent, DaemonClient};

/// A line-oriented REPL against the daemon over stdin/stdout — the `run`
/// command's manual-testing surface. Not a chat-session product; nothing
/// here is persisted to a transcript.
pub(crate) async fn run_interactive_session(config: &AppConfig, daemon: DaemonClient) -> Result<()> {
    println!("{} is online. Type /help for commands, /exit to quit.", config.agent.name);

    let stdin = io::stdin();
    loop {
        let mut line = String::new();
        let bytes = stdin.read_line(&mut line)?;
        if bytes == 0 {
            println!("session closed");
            break;
        }
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if line == "/exit" {
            println!("session closed");
            break;
        }

        if line == "/help" {
            println!("/help                 this message");
            println!("/status               daemon + memory summary");
            println!("/memory               peek at recent memory entries");
            println!("/consolidate          trigger a heuristic memory consolidation pass");
            println!("/tools                list registered tools");
            println!("/exit                 quit");
            continue;
        }

        if line == "/status" {
            let status = daemon.get_status().await?;
            println!("agent:    {}", status.agent_name);
            println!("provider: {}", status.provider);
            println!("model:    {}", status.primary_model);
            println!(
                "memory:   {} total (core={} profile={} reflective={} semantic={} episodic={})",
                status.memory_total, status.memory_core, status.memory_user_profile, status.memory_reflective, status.memory_semantic, status.memory_episodic
            );
            println!("tasks:    {} open", status.open_tasks);
            println!("uptime:   {}s", status.uptime_secs);
            continue;
        }

        if line == "/memory" {
            let peek = daemon.get_memory_peek(5).await?;
            if peek.is_empty() {
                println!("(no memory entries)");
            } else {
                println!("{}", peek.join("\n"));
            }
            continue;
        }

        if line == "/consolidate" {
            println!("running consolidation…");
            match daemon.run_consolidation().await {
                Ok(msg) => println!("{msg}"),
                Err(err) => eprintln!("error: {err}"),
            }
            continue;
        }

        if line == "/tools" {
            let specs = daemon.list_tools().await?;
            if specs.is_empty() {
                println!("(no tools registered)");
            } else {
                for spec in &specs {
                    println!("- {} — {}", spec.name, spec.description);
                }
            }
            continue;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        daemon.stream_submit(line.to_string(), tx).await?;
        while let Ok(event) = rx.try_recv() {
            match event {
                BackendEvent::Token(chunk) => print!("{chunk}"),
                BackendEvent::Done => {
                    println!();
                    break;
                }
                BackendEvent::Error(err) => {
                    println!("error: {err}");
                    break;
                }
                _ => {}
            }
        }
    }

    Ok(())
}
