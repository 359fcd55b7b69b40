mod daemon;
mod interactive;
mod memory_cmds;
mod onboard;
mod task_cmds;

use std::fs;
use std::io;
use std::io::IsTerminal;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use meridian_config::AppConfig;
use meridian_memory::MemoryManager;
use meridian_runtime::DaemonClient;
use meridian_task::TaskManager;

#[derive(Debug, Parser)]
#[command(name = "meridian", version, about = "A persistent memory-centric AI agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// First-run setup: agent identity, LLM provider, core memory seeding.
    Onboard,
    #[command(name = "configuration", visible_alias = "config", about = "Update agent settings")]
    Configuration,
    /// Ensure the daemon is running and open a line-oriented session against it.
    Start,
    #[command(hide = true)]
    Run,
    /// Submit a single message and print the reply, without entering a session.
    Query {
        message: Vec<String>,
    },
    /// Manage the background daemon process directly.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    Tool {
        #[command(subcommand)]
        command: ToolCommands,
    },
    Reset {
        #[arg(long)]
        hard: bool,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum DaemonCommands {
    Start {
        #[arg(long)]
        force: bool,
    },
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMemoryLayer {
    All,
    Episodic,
    Semantic,
    Procedural,
    Core,
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    Wipe {
        #[arg(long, value_enum, default_value = "all")]
        layer: CliMemoryLayer,
        #[arg(long)]
        yes: bool,
    },
    Stats,
    InspectCore {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Promotions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    ExportVault {
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum TaskCommands {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Stats,
    Show {
        id: String,
    },
    Overdue,
    Completed {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
enum ToolCommands {
    /// List all tools registered in the running daemon.
    List,
    /// Execute a tool directly (key=value arguments).
    Call {
        name: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut config = AppConfig::load_from("config/default.toml")?;
    let config_exists = Path::new("config/default.toml").exists();
    let memory_log_path = Path::new(".meridian").join("memory").join("events.jsonl");

    if std::env::var("MERIDIAN_DAEMON_PROCESS").ok().as_deref() == Some("1") {
        daemon::run_daemon_process(config, &memory_log_path).await?;
        return Ok(());
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Onboard => {
            onboard::run_onboarding(&mut config)?;
            config.save_to("config/default.toml")?;
            seed_identity_from_config(&config, &memory_log_path).await?;
            println!("onboarding complete — run `meridian start` to begin");
        }
        Commands::Configuration => {
            onboard::run_configuration(&mut config)?;
            config.save_to("config/default.toml")?;
            seed_identity_from_config(&config, &memory_log_path).await?;
            println!("configuration updated");
        }
        Commands::Start | Commands::Run => {
            if !config_exists || config.needs_onboarding() {
                onboard::run_onboarding(&mut config)?;
                config.save_to("config/default.toml")?;
                seed_identity_from_config(&config, &memory_log_path).await?;
            }

            daemon::ensure_daemon_running()?;
            let client = DaemonClient::new(daemon::SOCKET_PATH);
            interactive::run_interactive_session(&config, client).await?;
        }
        Commands::Query { message } => {
            if !config_exists || config.needs_onboarding() {
                bail!("onboarding not complete; run `meridian onboard` first");
            }
            let text = message.join(" ");
            if text.trim().is_empty() {
                bail!("query requires a message");
            }

            daemon::ensure_daemon_running()?;
            let client = DaemonClient::new(daemon::SOCKET_PATH);
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            client.stream_submit(text, tx).await?;
            while let Ok(event) = rx.try_recv() {
                match event {
                    meridian_runtime::BackendEvent::Token(chunk) => print!("{chunk}"),
                    meridian_runtime::BackendEvent::Error(err) => eprintln!("error: {err}"),
                    _ => {}
                }
            }
            println!();
        }
        Commands::Daemon { command } => match command {
            DaemonCommands::Start { force } => daemon::daemon_start(force)?,
            DaemonCommands::Stop => daemon::daemon_stop().await?,
            DaemonCommands::Restart => {
                daemon::daemon_stop().await?;
                daemon::daemon_start(true)?;
            }
            DaemonCommands::Status => daemon::daemon_status()?,
        },
        Commands::Memory { command } => match command {
            MemoryCommands::Wipe { layer, yes } => {
                let mut memory = MemoryManager::with_event_log(&memory_log_path).await?;
                memory_cmds::run_memory_wipe(&mut memory, layer, yes).await?;
            }
            MemoryCommands::Stats => {
                let memory = MemoryManager::with_event_log(&memory_log_path).await?;
                memory_cmds::run_memory_stats(&memory);
            }
            MemoryCommands::InspectCore { limit } => {
                let memory = MemoryManager::with_event_log(&memory_log_path).await?;
                memory_cmds::run_memory_inspect_core(&memory, limit.max(1));
            }
            MemoryCommands::Promotions { limit } => {
                let memory = MemoryManager::with_event_log(&memory_log_path).await?;
                memory_cmds::run_memory_promotions(&memory, limit.max(1));
            }
            MemoryCommands::ExportVault { path } => {
                let memory = MemoryManager::with_event_log(&memory_log_path).await?;
                let target = path.unwrap_or_else(|| ".meridian/vault".to_string());
                memory_cmds::run_memory_export_vault(&memory, &target)?;
            }
        },
        Commands::Task { command } => {
            let manager = TaskManager::new(config.task.storage_path.clone())?;
            match command {
                TaskCommands::List { limit } => task_cmds::run_task_list(&manager, limit),
                TaskCommands::Stats => task_cmds::run_task_stats(&manager),
                TaskCommands::Show { id } => task_cmds::run_task_show(&manager, &id)?,
                TaskCommands::Overdue => task_cmds::run_task_overdue(&manager),
                TaskCommands::Completed { limit } => task_cmds::run_task_completed(&manager, limit),
            }
        }
        Commands::Tool { command } => {
            let client = DaemonClient::new(daemon::SOCKET_PATH);
            match command {
                ToolCommands::List => match client.list_tools().await {
                    Ok(specs) => {
                        println!("── registered tools ─────────────────────────────────");
                        for spec in &specs {
                            println!("  {} — {}", spec.name, spec.description);
                            for p in &spec.params {
                                println!("      {} [{}] — {}", p.name, if p.required { "required" } else { "optional" }, p.description);
                            }
                        }
                        println!("  ({} tools total)", specs.len());
                    }
                    Err(err) => eprintln!("error listing tools: {err}"),
                },
                ToolCommands::Call { name, args } => {
                    let mut parsed: std::collections::HashMap<String, String> = std::collections::HashMap::new();
                    for item in &args {
                        if let Some((k, v)) = item.split_once('=') {
                            parsed.insert(k.to_string(), v.to_string());
                        } else {
                            eprintln!("warning: skipping malformed arg '{item}' (expected key=value)");
                        }
                    }
                    match client.execute_tool(&name, parsed).await {
                        Ok((success, output)) => {
                            let status = if success { "succeeded" } else { "failed" };
                            println!("tool '{name}' {status}:");
                            println!("{output}");
                        }
                        Err(err) => eprintln!("error calling tool '{name}': {err}"),
                    }
                }
            }
        }
        Commands::Reset { hard, yes } => {
            run_reset_command(hard, yes).await?;
        }
    }

    Ok(())
}

async fn seed_identity_from_config(config: &AppConfig, memory_log_path: &Path) -> Result<()> {
    if config.agent.user_name.trim().is_empty() || config.agent.name.trim().is_empty() {
        return Ok(());
    }

    let mut memory = MemoryManager::with_event_log(memory_log_path).await?;
    memory.seed_core_identity(&config.agent.user_name, &config.agent.name).await?;
    memory.flush_all()?;
    Ok(())
}

async fn run_reset_command(hard: bool, yes: bool) -> Result<()> {
    if !hard {
        bail!("reset requires --hard (for now, only full reset is supported)");
    }

    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing hard reset in non-interactive mode without --yes");
        }

        print!("This will stop the daemon, wipe .meridian state, and require onboarding again. Type 'RESET HARD' to continue: ");
        io::stdout().flush()?;
        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != "RESET HARD" {
            println!("reset cancelled");
            return Ok(());
        }
    }

    let client = DaemonClient::new(daemon::SOCKET_PATH);
    let _ = client.graceful_shutdown().await;

    let paths = daemon::daemon_paths();
    if let Some(pid) = daemon::read_pid(&paths.pid_file)? {
        if daemon::is_pid_running(pid) {
            let _ = daemon::terminate_pid(pid);
            daemon::wait_for_pid_exit(pid, Duration::from_secs(4));
        }
    }

    clear_dir_contents(Path::new(".meridian").join("memory").as_path())?;
    clear_dir_contents(Path::new(".meridian").join("vault").as_path())?;
    clear_dir_contents(Path::new(".meridian").join("runtime").as_path())?;
    clear_dir_contents(Path::new(".meridian").join("data").as_path())?;

    if let Ok(mut config) = AppConfig::load_from("config/default.toml") {
        config.onboarding.completed = false;
        config.save_to("config/default.toml")?;
    }

    println!("hard reset complete");
    println!("- daemon stopped");
    println!("- state wiped: .meridian/memory, .meridian/vault, .meridian/runtime, .meridian/data");
    println!("- onboarding required on next start");
    Ok(())
}

fn clear_dir_contents(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
