use std::io::{self, Write};

use anyhow::Result;

use meridian_config::AppConfig;

fn prompt(label: &str, default: &str) -> Result<String> {
    print!("{label} [{default}]: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let trimmed = line.trim();
    Ok(if trimmed.is_empty() { default.to_string() } else { trimmed.to_string() })
}

/// First-run wizard: agent name, user name, and LLM provider. Anything not
/// asked here keeps its built-in default and can be edited directly in
/// `config/default.toml` afterward.
pub(crate) fn run_onboarding(config: &mut AppConfig) -> Result<()> {
    println!("── first-run setup ──────────────────────────────────");
    config.agent.name = prompt("agent name", &config.agent.name)?;
    config.agent.user_name = prompt("your name", "friend")?;
    config.llm.provider = prompt("llm provider (ollama|openrouter)", &config.llm.provider)?;
    if config.llm.provider.eq_ignore_ascii_case("openrouter") {
        config.llm.primary_model = prompt("primary model", "openai/gpt-4o-mini")?;
    } else {
        config.llm.primary_model = prompt("primary model", &config.llm.primary_model)?;
    }
    config.onboarding.completed = true;
    Ok(())
}

pub(crate) fn run_configuration(config: &mut AppConfig) -> Result<()> {
    println!("── update configuration ─────────────────────────────");
    config.agent.name = prompt("agent name", &config.agent.name)?;
    config.llm.provider = prompt("llm provider (ollama|openrouter)", &config.llm.provider)?;
    config.llm.primary_model = prompt("primary model", &config.llm.primary_model)?;
    Ok(())
}
