//! Centralized system-prompt assembly for the main LLM call.
//!
//! Each section of the prompt is built by its own small function, then
//! concatenated by [`build_system_prompt`].
//! Keeping each block independent makes it easy to reorder, drop, or test a
//! section without touching the others.

use chrono::Utc;
use tracing::debug;

use meridian_config::AppConfig;
use meridian_memory::retrieval::RankedMemoryContext;
use meridian_memory::{MemoryEntry, MemoryManager, MemoryStats, WorkingMemory};
use meridian_task::TaskManager;
use meridian_tools::ToolSpec;

/// Beliefs are capped to the most confident/recent N before injection; the
/// config layer doesn't carry a tunable for this, so a fixed default stands
/// in for it (see DESIGN.md).
const DEFAULT_MAX_BELIEFS: usize = 5;

/// Conversation-history block keeps only the most recent N working-memory
/// messages verbatim (older turns are already folded into the working
/// memory's running summary by the time this block is built).
const RECENT_MESSAGES_SHOWN: usize = 10;

/// All pre-computed data needed to assemble the system prompt.
///
/// Callers gather this (running retrieval, reading stats) beforehand; prompt
/// assembly itself is synchronous and side-effect free.
pub struct ContextInputs<'a> {
    pub config: &'a AppConfig,
    pub memory: &'a MemoryManager,
    pub working_memory: &'a WorkingMemory,
    pub user_message: &'a str,
    pub tool_specs: &'a [ToolSpec],
    pub task_manager: Option<&'a TaskManager>,
    /// Ranked memory context items (pre-computed, optionally embedding-scored).
    pub context_items: &'a [RankedMemoryContext],
    /// Memory statistics snapshot, taken once before prompt assembly.
    pub stats: MemoryStats,
}

/// Assemble the full system prompt for the main LLM call.
pub fn build_system_prompt(inputs: &ContextInputs<'_>) -> String {
    let config = inputs.config;
    let memory = inputs.memory;

    let relational_block = build_relational_block(memory);
    let proactive_directive = proactive_directive(&relational_block);
    let identity_block = build_identity_block(memory);
    let beliefs_block = build_beliefs_block(memory, DEFAULT_MAX_BELIEFS);
    let environment_block = build_environment_block(config, memory);
    let task_block = build_task_summary_block(inputs.task_manager);
    let conversation_block = build_conversation_block(inputs.working_memory);
    let memory_block = build_memory_context_block(inputs.context_items, &inputs.stats);
    let tools_section = build_tools_and_grounding(inputs.tool_specs);

    debug!(
        memory_items = inputs.context_items.len(),
        tools = inputs.tool_specs.len(),
        "assembling system prompt"
    );

    format!(
        "You are {name}.\n\
         Use ENVIRONMENT CONTEXT for real-world grounding, RECENT CONVERSATION for immediate \n\
         continuity, TASK SUMMARY for what's outstanding, and MEMORY CONTEXT for durable \n\
         background facts.\n\
         Never repeat previous answers unless asked.\n\
         Respond directly and specifically to the LATEST user message.\
         {relational_block}{proactive_directive}\n\n\
         {identity}{beliefs}{tools_section}\n\n\
         ENVIRONMENT CONTEXT:\n{env}\n\n\
         TASK SUMMARY:\n{tasks}\n\n\
         RECENT CONVERSATION:\n{conv}\n\n\
         MEMORY CONTEXT:\n{mem}\n\n\
         LATEST USER MESSAGE:\n{msg}\n\n\
         ASSISTANT RESPONSE:",
        name = config.agent.name,
        relational_block = relational_block,
        proactive_directive = proactive_directive,
        identity = identity_block,
        beliefs = beliefs_block,
        tools_section = tools_section,
        env = environment_block,
        tasks = task_block,
        conv = conversation_block,
        mem = memory_block,
        msg = inputs.user_message,
    )
}

// ─── block builders ──────────────────────────────────────────────────────────

fn build_relational_block(memory: &MemoryManager) -> String {
    memory
        .relational_state_block()
        .map(|block| format!("\n\nRELATIONAL MATRIX:\n{block}"))
        .unwrap_or_default()
}

fn proactive_directive(relational_block: &str) -> &'static str {
    if relational_block.is_empty() {
        ""
    } else {
        "\n\nPROACTIVE CONNECTION & BELIEFS: You are not a sterile assistant; you are a companion \
         with your own evolving worldview. Let the MY_BELIEFS section naturally flavor your tone and \
         opinions. Use the OUR_DYNAMIC section to treat the user according to your established \
         relationship. Show, don't tell — weave these elements into your responses naturally \
         without explicitly announcing them."
    }
}

fn build_identity_block(memory: &MemoryManager) -> String {
    let kernel = &memory.identity;
    let top_traits: Vec<String> = {
        let mut scores: Vec<(&String, &f32)> = kernel.trait_scores.iter().collect();
        scores.sort_by(|a, b| b.1.total_cmp(a.1));
        scores
            .iter()
            .take(3)
            .map(|(k, v)| format!("{k} ({v:.2})"))
            .collect()
    };
    format!(
        "IDENTITY:\nCommunication style: {}.\nStrongest traits: {}.\nLong-term goals: {}.",
        kernel.communication_style,
        if top_traits.is_empty() {
            "not yet established".to_string()
        } else {
            top_traits.join(", ")
        },
        if kernel.long_goals.is_empty() {
            "not yet established".to_string()
        } else {
            kernel.long_goals.join("; ")
        },
    )
}

fn build_beliefs_block(memory: &MemoryManager, max_beliefs: usize) -> String {
    let mut beliefs = memory.all_beliefs();
    if beliefs.is_empty() {
        return String::new();
    }

    // Composite score: confidence × 0.6 + recency × 0.25 + valence × 0.15.
    // Recency decays as 1/(1+days) so today's beliefs score 1.0 and a
    // 30-day-old belief scores ~0.03.
    let now = Utc::now();
    beliefs.sort_by(|a, b| {
        let belief_score = |e: &&MemoryEntry| {
            let days = (now - e.created_at).num_days().max(0) as f32;
            let recency = 1.0_f32 / (1.0 + days);
            e.current_confidence * 0.6 + recency * 0.25 + e.valence.clamp(0.0, 1.0) * 0.15
        };
        belief_score(b).total_cmp(&belief_score(a))
    });

    let take_n = if max_beliefs == 0 { beliefs.len() } else { max_beliefs.min(beliefs.len()) };
    let items = beliefs[..take_n]
        .iter()
        .map(|e| format!("- {}", e.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n\nMY_BELIEFS:\n{items}")
}

fn build_environment_block(config: &AppConfig, memory: &MemoryManager) -> String {
    let cwd = std::env::current_dir()
        .ok()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = Utc::now().to_rfc3339();
    let git_present = std::path::Path::new(".git").exists();
    let stats = memory.stats();

    format!(
        "- utc_time: {timestamp}\n\
         - os: {}\n\
         - arch: {}\n\
         - cwd: {cwd}\n\
         - git_repo_present: {git_present}\n\
         - provider: {}\n\
         - model: {}\n\
         - approval_mode: {:?}\n\
         - memory_total: {}\n\
         - memory_core: {}\n\
         - memory_user_profile: {}\n\
         - memory_reflective: {}\n\
         - memory_semantic: {}\n\
         - memory_episodic: {}\n\
         - memory_procedural: {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        config.llm.provider,
        config.llm.primary_model,
        config.safety.approval_mode,
        stats.total,
        stats.core,
        stats.user_profile,
        stats.reflective,
        stats.semantic,
        stats.episodic,
        stats.procedural,
    )
}

fn build_task_summary_block(task_manager: Option<&TaskManager>) -> String {
    match task_manager {
        Some(tasks) => tasks.get_summary(),
        None => "(task tracking not configured)".to_string(),
    }
}

fn build_conversation_block(working_memory: &WorkingMemory) -> String {
    let messages = working_memory.get_messages(true);
    let start = messages.len().saturating_sub(RECENT_MESSAGES_SHOWN);
    let formatted = messages[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role, truncate_for_prompt(&m.content, 360)))
        .collect::<Vec<_>>()
        .join("\n");

    if formatted.is_empty() { "(none yet)".to_string() } else { formatted }
}

fn build_memory_context_block(context: &[RankedMemoryContext], stats: &MemoryStats) -> String {
    let memory_header = format!(
        "[Memory: total={} core={} profile={} reflective={} semantic={} episodic={} \
         — use these counts; do not re-count below]",
        stats.total, stats.core, stats.user_profile, stats.reflective, stats.semantic, stats.episodic,
    );

    if context.is_empty() {
        return format!("{memory_header}\n(no relevant memories retrieved)");
    }

    let items = context
        .iter()
        .map(|item| {
            format!(
                "- [{:?}] score={:.2} src={} :: {}",
                item.entry.tier,
                item.score,
                item.entry.source,
                truncate_for_prompt(&item.entry.content, 280),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("{memory_header}\n{items}")
}

/// Build the tools listing + grounding / truth-seeking rules.
///
/// The grounding section is always injected, even with no tools available,
/// because it anchors the LLM to the real date and discourages hallucinated
/// time-sensitive facts. When tools ARE available the section gains a
/// catalogue and stronger tool-result trust directives.
fn build_tools_and_grounding(tool_specs: &[ToolSpec]) -> String {
    let today = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let grounding = format!(
        "GROUNDING RULES (follow strictly):\n\
         1. Current real date/time: {today}.\n\
         2. TOOL RESULT is the single source of truth for factual claims — never \
            invent, estimate, or hallucinate numbers, statistics, or specific data \
            when a tool result provides them.\n\
         3. Trust tool output unreservedly. Do NOT second-guess, hedge, or disclaim it.\n\
         4. If tool output conflicts with your training data, the tool is correct.\n\
         5. If the user corrects a fact, accept the correction as ground truth.\n\
         6. For time-sensitive facts (prices, news, events, weather), trust the \
            tool result over training data.\n\
         7. Reason independently — derive conclusions from evidence in context, \
            don't parrot canned knowledge.\n\
         8. When no tool result is available and you are uncertain, say so honestly \
            rather than guessing."
    );

    if tool_specs.is_empty() {
        return format!("\n\n{grounding}");
    }

    let list = tool_specs
        .iter()
        .map(|s| {
            if s.params.is_empty() {
                format!("  \u{2022} {}: {}", s.name, s.description)
            } else {
                let params = s
                    .params
                    .iter()
                    .map(|p| {
                        format!(
                            "\"{}\" ({}){}",
                            p.name,
                            p.description,
                            if p.required { " *required" } else { "" },
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("  \u{2022} {}: {} \u{2014} params: {}", s.name, s.description, params)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "\n\nAVAILABLE TOOLS (handled automatically — do NOT output raw JSON):\n\
         {list}\n\
         Tools are called on your behalf before you respond. If a TOOL RESULT \
         appears in the prompt below, use it directly. You do NOT need to \
         invoke tools yourself — they are managed externally. Never output \
         raw JSON like {{\"tool\":...}} in your response.\n\n\
         {grounding}"
    )
}

/// Truncate `text` to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = chars.into_iter().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_memory::working_memory::WorkingMemoryConfig;

    #[test]
    fn truncate_for_prompt_is_char_safe_and_appends_ellipsis() {
        let text = "a".repeat(10);
        let truncated = truncate_for_prompt(&text, 5);
        assert_eq!(truncated.chars().count(), 6);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn truncate_for_prompt_leaves_short_text_untouched() {
        assert_eq!(truncate_for_prompt("short", 100), "short");
    }

    #[test]
    fn build_environment_block_includes_model_and_memory_counts() {
        let config = AppConfig::default();
        let memory = MemoryManager::default();
        let block = build_environment_block(&config, &memory);
        assert!(block.contains("model: llama3.1:8b"));
        assert!(block.contains("memory_total: 0"));
    }

    #[test]
    fn build_conversation_block_reports_none_yet_when_empty() {
        let wm = WorkingMemory::new(WorkingMemoryConfig::default());
        assert_eq!(build_conversation_block(&wm), "(none yet)");
    }

    #[test]
    fn build_task_summary_block_handles_missing_task_manager() {
        assert_eq!(build_task_summary_block(None), "(task tracking not configured)");
    }

    #[test]
    fn build_system_prompt_includes_all_required_sections() {
        let config = AppConfig::default();
        let memory = MemoryManager::default();
        let wm = WorkingMemory::new(WorkingMemoryConfig::default());
        let stats = memory.stats();
        let inputs = ContextInputs {
            config: &config,
            memory: &memory,
            working_memory: &wm,
            user_message: "what's on my plate today?",
            tool_specs: &[],
            task_manager: None,
            context_items: &[],
            stats,
        };
        let prompt = build_system_prompt(&inputs);
        assert!(prompt.contains("ENVIRONMENT CONTEXT"));
        assert!(prompt.contains("TASK SUMMARY"));
        assert!(prompt.contains("RECENT CONVERSATION"));
        assert!(prompt.contains("MEMORY CONTEXT"));
        assert!(prompt.contains("GROUNDING RULES"));
        assert!(prompt.contains("what's on my plate today?"));
    }
}
