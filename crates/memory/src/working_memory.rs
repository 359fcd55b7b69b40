//! Bounded, token-aware working memory — the agent's short-term scratch
//! space.  Capacity is ~2000 tokens by default: recent turns, a handful of
//! named slots (identity, current context, key facts), and a running
//! summary of whatever got compressed out.
//!
//! This is deliberately separate from the tiered long-term memory in
//! [`crate::schema`] — working memory never touches the event log and is
//! rebuilt fresh at process start.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tokens per CJK character (heuristic: no tokenizer dependency).
const TOKEN_RATIO_CJK: f32 = 0.5;
/// Tokens per non-CJK character.
const TOKEN_RATIO_OTHER: f32 = 0.25;
/// Compression triggers once usage crosses this fraction of `max_tokens`.
const SUMMARY_TRIGGER_RATIO: f32 = 0.8;
/// Number of most-recent non-system turns kept verbatim during compression.
const RECENT_TURNS_KEPT: usize = 5;

/// Deterministic token estimate for `text`.
///
/// Not a real tokenizer — a fixed heuristic so the same string always
/// estimates to the same count regardless of locale or external state.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut cjk = 0usize;
    let mut other = 0usize;
    for ch in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    let tokens = (cjk as f32 * TOKEN_RATIO_CJK + other as f32 * TOKEN_RATIO_OTHER) as usize;
    tokens.max(1)
}

/// Topic keywords scanned when folding old turns into the running summary.
/// `(keyword, topic_label)` — first match per turn wins.
const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("creat", "creation requests"),
    ("search", "information search"),
    ("weather", "weather lookups"),
    ("task", "task management"),
    ("remind", "reminders"),
    ("remember", "memory operations"),
    ("calculat", "calculations"),
    ("analy", "analysis"),
    ("schedul", "scheduling"),
    ("delet", "deletions"),
    ("config", "configuration changes"),
];

/// Produce a short topic summary for a run of turns being folded out of the
/// active window.  No LLM required — callers may substitute a smarter
/// summarizer via [`WorkingMemory::compact`].
fn summarize_turns(turns: &[Message]) -> String {
    if turns.is_empty() {
        return String::new();
    }
    let mut topics: Vec<&str> = Vec::new();
    for turn in turns {
        let lower = turn.content.to_lowercase();
        for (keyword, topic) in TOPIC_KEYWORDS {
            if lower.contains(keyword) && !topics.contains(topic) {
                topics.push(topic);
            }
        }
    }
    if topics.is_empty() {
        format!("{} earlier turns (no distinct topic detected)", turns.len())
    } else {
        format!("earlier turns touched on: {}", topics.join(", "))
    }
}

/// A single conversational turn held in the active window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// `"user"`, `"assistant"`, or `"system"`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into(), timestamp: Utc::now() }
    }
}

/// A named, priority-ranked content slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemorySlot {
    pub name: String,
    pub content: String,
    pub max_tokens: usize,
    /// Higher priority slots survive eviction; `identity` is never evicted
    /// regardless of its priority value.
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct WorkingMemoryConfig {
    pub max_tokens: usize,
    pub max_slots: usize,
    pub max_messages: usize,
    pub identity_tokens: usize,
    pub context_tokens: usize,
    pub facts_tokens: usize,
    pub enable_compression: bool,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            max_slots: 10,
            max_messages: 20,
            identity_tokens: 500,
            context_tokens: 500,
            facts_tokens: 1000,
            enable_compression: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkingMemoryStats {
    pub message_count: usize,
    pub message_tokens: usize,
    pub slot_count: usize,
    pub slot_tokens: usize,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub usage_ratio: f32,
    pub has_summary: bool,
    pub within_limit: bool,
}

/// Short-term scratch space: recent turns plus a few named slots, held
/// within a fixed token budget via automatic compression.
pub struct WorkingMemory {
    config: WorkingMemoryConfig,
    slots: HashMap<String, WorkingMemorySlot>,
    messages: Vec<Message>,
    summary: String,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(WorkingMemoryConfig::default())
    }
}

impl WorkingMemory {
    pub fn new(config: WorkingMemoryConfig) -> Self {
        let mut slots = HashMap::new();
        slots.insert(
            "identity".to_string(),
            WorkingMemorySlot {
                name: "identity".to_string(),
                content: String::new(),
                max_tokens: config.identity_tokens,
                priority: 10,
            },
        );
        slots.insert(
            "context".to_string(),
            WorkingMemorySlot {
                name: "context".to_string(),
                content: String::new(),
                max_tokens: config.context_tokens,
                priority: 5,
            },
        );
        slots.insert(
            "facts".to_string(),
            WorkingMemorySlot {
                name: "facts".to_string(),
                content: String::new(),
                max_tokens: config.facts_tokens,
                priority: 3,
            },
        );
        Self { config, slots, messages: Vec::new(), summary: String::new() }
    }

    // ── Turn window ──────────────────────────────────────────────────────

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
        self.manage_context();
    }

    fn manage_context(&mut self) {
        if !self.config.enable_compression {
            self.trim_by_count();
            return;
        }
        let total = self.message_tokens();
        if total as f32 <= self.config.max_tokens as f32 * SUMMARY_TRIGGER_RATIO {
            if self.messages.len() > self.config.max_messages {
                self.trim_by_count();
            }
            return;
        }
        self.compress_context();
    }

    fn message_tokens(&self) -> usize {
        self.messages.iter().map(|m| estimate_tokens(&m.content)).sum()
    }

    fn trim_by_count(&mut self) {
        if self.messages.len() <= self.config.max_messages {
            return;
        }
        let (system, other): (Vec<Message>, Vec<Message>) =
            self.messages.drain(..).partition(|m| m.role == "system");
        let keep = self.config.max_messages.saturating_sub(system.len());
        let start = other.len().saturating_sub(keep);
        self.messages = system.into_iter().chain(other.into_iter().skip(start)).collect();
    }

    /// Fold everything but the last [`RECENT_TURNS_KEPT`] non-system turns
    /// into the running summary.
    fn compress_context(&mut self) {
        let (system, other): (Vec<Message>, Vec<Message>) =
            self.messages.drain(..).partition(|m| m.role == "system");

        if other.len() <= RECENT_TURNS_KEPT {
            self.messages = system.into_iter().chain(other).collect();
            self.trim_by_count();
            return;
        }

        let split = other.len() - RECENT_TURNS_KEPT;
        let (old, recent) = other.split_at(split);
        let new_summary = summarize_turns(old);
        self.summary = if self.summary.is_empty() {
            new_summary
        } else {
            format!("{}; {}", self.summary, new_summary)
        };
        self.messages = system.into_iter().chain(recent.iter().cloned()).collect();
        debug!(kept = self.messages.len(), summary_len = self.summary.len(), "compressed working-memory context");
    }

    pub fn get_summary(&self) -> &str {
        &self.summary
    }

    /// Return the turn window, optionally with a synthetic system message
    /// carrying the running summary inserted right after the last system turn.
    pub fn get_messages(&self, include_summary: bool) -> Vec<Message> {
        let mut out = self.messages.clone();
        if include_summary && !self.summary.is_empty() {
            let summary_msg = Message::new("system", format!("[earlier context] {}", self.summary));
            match out.iter().rposition(|m| m.role == "system") {
                Some(idx) => out.insert(idx + 1, summary_msg),
                None => out.insert(0, summary_msg),
            }
        }
        out
    }

    // ── Slots ────────────────────────────────────────────────────────────

    pub fn set_identity(&mut self, content: impl Into<String>) {
        let content = content.into();
        debug!(len = content.len(), "updated identity slot");
        if let Some(slot) = self.slots.get_mut("identity") {
            slot.content = content;
        }
    }

    pub fn set_context(&mut self, content: impl Into<String>) {
        let content = content.into();
        debug!(len = content.len(), "updated context slot");
        if let Some(slot) = self.slots.get_mut("context") {
            slot.content = content;
        }
    }

    pub fn add_fact(&mut self, fact: &str) {
        if let Some(slot) = self.slots.get_mut("facts") {
            if slot.content.is_empty() {
                slot.content = format!("- {fact}");
            } else {
                slot.content = format!("{}\n- {fact}", slot.content);
            }
        }
    }

    pub fn get_context(&self) -> &str {
        self.slots.get("context").map(|s| s.content.as_str()).unwrap_or("")
    }

    /// Write (or create) a named slot.  Existing slots are overwritten in
    /// place; new slots evict the lowest-priority non-identity slot when the
    /// slot table is full and the incoming priority outranks it.
    pub fn write_slot(&mut self, name: &str, content: impl Into<String>, priority: f32) {
        let priority_i = (priority * 10.0) as i32;
        if let Some(slot) = self.slots.get_mut(name) {
            slot.content = content.into();
            slot.priority = priority_i;
            return;
        }
        if self.slots.len() >= self.config.max_slots {
            let lowest = self
                .slots
                .values()
                .filter(|s| s.name != "identity")
                .min_by_key(|s| s.priority)
                .map(|s| (s.name.clone(), s.priority));
            match lowest {
                Some((lowest_name, lowest_priority)) if lowest_priority < priority_i => {
                    debug!(evicted = %lowest_name, "evicted lowest-priority working-memory slot");
                    self.slots.remove(&lowest_name);
                }
                _ => {
                    debug!(name, "slot table full — new slot rejected");
                    return;
                }
            }
        }
        self.slots.insert(
            name.to_string(),
            WorkingMemorySlot { name: name.to_string(), content: content.into(), max_tokens: 500, priority: priority_i },
        );
    }

    pub fn read_slot(&self, name: &str) -> Option<&WorkingMemorySlot> {
        self.slots.get(name)
    }

    /// Render every non-empty slot plus the running summary as a single
    /// prompt-ready block, identity first.
    pub fn get_full_context(&self) -> String {
        let mut sections = Vec::new();
        if let Some(slot) = self.slots.get("identity").filter(|s| !s.content.is_empty()) {
            sections.push(format!("[IDENTITY]\n{}", slot.content));
        }
        if !self.summary.is_empty() {
            sections.push(format!("[EARLIER SUMMARY]\n{}", self.summary));
        }
        if let Some(slot) = self.slots.get("context").filter(|s| !s.content.is_empty()) {
            sections.push(format!("[CURRENT CONTEXT]\n{}", slot.content));
        }
        if let Some(slot) = self.slots.get("facts").filter(|s| !s.content.is_empty()) {
            sections.push(format!("[KEY FACTS]\n{}", slot.content));
        }
        sections.join("\n\n")
    }

    pub fn is_within_limit(&self) -> bool {
        let slot_tokens: usize = self.slots.values().map(|s| estimate_tokens(&s.content)).sum();
        slot_tokens + self.message_tokens() <= self.config.max_tokens
    }

    /// Compress slots over their individual budgets.  `identity` is never
    /// trimmed.  When `summarizer` is supplied, the `context` slot is
    /// rewritten through it instead of being truncated from the front.
    pub fn compact(&mut self, summarizer: Option<&dyn Fn(&str) -> String>) {
        let names: Vec<String> = self.slots.keys().cloned().collect();
        for name in names {
            if name == "identity" {
                continue;
            }
            let (max_tokens, tokens, content) = {
                let slot = self.slots.get(&name).expect("name came from slots.keys()");
                (slot.max_tokens, estimate_tokens(&slot.content), slot.content.clone())
            };
            if tokens <= max_tokens {
                continue;
            }
            let compacted = if name == "context" {
                if let Some(f) = summarizer {
                    format!("[summary] {}", f(&content).trim())
                } else {
                    truncate_tail(&content, max_tokens, tokens)
                }
            } else {
                truncate_tail(&content, max_tokens, tokens)
            };
            debug!(slot = %name, "compacted working-memory slot");
            if let Some(slot) = self.slots.get_mut(&name) {
                slot.content = compacted;
            }
        }
        self.manage_context();
    }

    pub fn clear_context(&mut self) {
        if let Some(slot) = self.slots.get_mut("context") {
            slot.content.clear();
        }
        self.messages.clear();
        self.summary.clear();
    }

    pub fn clear_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.content.clear();
        }
        self.messages.clear();
        self.summary.clear();
    }

    pub fn get_stats(&self) -> WorkingMemoryStats {
        let message_tokens = self.message_tokens();
        let slot_tokens: usize = self.slots.values().map(|s| estimate_tokens(&s.content)).sum();
        let total = message_tokens + slot_tokens;
        WorkingMemoryStats {
            message_count: self.messages.len(),
            message_tokens,
            slot_count: self.slots.len(),
            slot_tokens,
            total_tokens: total,
            max_tokens: self.config.max_tokens,
            usage_ratio: total as f32 / self.config.max_tokens as f32,
            has_summary: !self.summary.is_empty(),
            within_limit: self.is_within_limit(),
        }
    }
}

/// Keep the most recent ~80% of `max_tokens`' worth of characters, prefixed
/// with an ellipsis marker.
fn truncate_tail(content: &str, max_tokens: usize, current_tokens: usize) -> String {
    if current_tokens == 0 {
        return content.to_string();
    }
    let ratio = max_tokens as f32 / current_tokens as f32;
    let keep_chars = ((content.chars().count() as f32) * ratio * 0.8) as usize;
    let tail: String = content.chars().rev().take(keep_chars).collect::<Vec<_>>().into_iter().rev().collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_counts_cjk_and_ascii_differently() {
        let ascii = estimate_tokens("aaaa"); // 4 * 0.25 = 1
        let cjk = estimate_tokens("一二三四"); // 4 * 0.5 = 2
        assert_eq!(ascii, 1);
        assert_eq!(cjk, 2);
    }

    #[test]
    fn estimate_tokens_never_zero_for_nonempty_text() {
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn identity_slot_is_seeded_and_never_evicted() {
        let mut wm = WorkingMemory::default();
        wm.set_identity("You are Meridian.");
        for i in 0..20 {
            wm.write_slot(&format!("scratch-{i}"), "x", 0.9);
        }
        assert!(wm.read_slot("identity").is_some());
        assert_eq!(wm.read_slot("identity").unwrap().content, "You are Meridian.");
    }

    #[test]
    fn low_priority_slot_is_evicted_for_higher_priority_incoming() {
        let mut wm = WorkingMemory::new(WorkingMemoryConfig { max_slots: 4, ..WorkingMemoryConfig::default() });
        wm.write_slot("low", "low content", 0.1);
        wm.write_slot("high", "high content", 0.9);
        // identity + context + facts + low + high = 5 > max_slots(4): low evicted.
        assert!(wm.read_slot("low").is_none());
        assert!(wm.read_slot("high").is_some());
    }

    #[test]
    fn trim_by_count_keeps_system_messages_and_recent_tail() {
        let mut wm = WorkingMemory::new(WorkingMemoryConfig {
            max_messages: 3,
            enable_compression: false,
            ..WorkingMemoryConfig::default()
        });
        wm.add_message("system", "you are an assistant");
        for i in 0..10 {
            wm.add_message("user", format!("turn {i}"));
        }
        let messages = wm.get_messages(false);
        assert!(messages.iter().any(|m| m.role == "system"));
        assert!(messages.len() <= 3);
        assert_eq!(messages.last().unwrap().content, "turn 9");
    }

    #[test]
    fn compression_triggers_above_token_threshold_and_produces_summary() {
        let mut wm = WorkingMemory::new(WorkingMemoryConfig {
            max_tokens: 50,
            max_messages: 1000,
            ..WorkingMemoryConfig::default()
        });
        for i in 0..30 {
            wm.add_message("user", format!("user asked to create a new task number {i}"));
        }
        assert!(!wm.get_summary().is_empty(), "expected compression to produce a summary");
        assert!(wm.get_messages(false).len() <= RECENT_TURNS_KEPT + 0, "recent turns kept should be bounded");
    }

    #[test]
    fn get_messages_inserts_summary_after_last_system_turn() {
        let mut wm = WorkingMemory::new(WorkingMemoryConfig {
            max_tokens: 10,
            max_messages: 1000,
            ..WorkingMemoryConfig::default()
        });
        wm.add_message("system", "you are an assistant");
        for i in 0..20 {
            wm.add_message("user", format!("please search for topic {i}"));
        }
        let messages = wm.get_messages(true);
        let system_idx = messages.iter().position(|m| m.role == "system").unwrap();
        assert!(messages[system_idx + 1].content.contains("[earlier context]"));
    }

    #[test]
    fn get_full_context_orders_identity_summary_context_facts() {
        let mut wm = WorkingMemory::default();
        wm.set_identity("I am Meridian.");
        wm.set_context("discussing the roadmap");
        wm.add_fact("user prefers concise answers");
        let block = wm.get_full_context();
        let identity_pos = block.find("[IDENTITY]").unwrap();
        let context_pos = block.find("[CURRENT CONTEXT]").unwrap();
        let facts_pos = block.find("[KEY FACTS]").unwrap();
        assert!(identity_pos < context_pos);
        assert!(context_pos < facts_pos);
    }

    #[test]
    fn compact_truncates_oversized_non_identity_slot() {
        let mut wm = WorkingMemory::default();
        wm.write_slot("facts", "x".repeat(10_000), 0.3);
        wm.compact(None);
        let slot = wm.read_slot("facts").unwrap();
        assert!(estimate_tokens(&slot.content) < 10_000);
        assert!(slot.content.starts_with("..."));
    }

    #[test]
    fn compact_never_touches_identity_slot() {
        let mut wm = WorkingMemory::default();
        wm.set_identity("x".repeat(5_000));
        wm.compact(None);
        assert_eq!(wm.read_slot("identity").unwrap().content.len(), 5_000);
    }

    #[test]
    fn clear_context_clears_messages_and_summary_but_keeps_identity() {
        let mut wm = WorkingMemory::default();
        wm.set_identity("I am Meridian.");
        wm.add_message("user", "hello");
        wm.clear_context();
        assert!(wm.get_messages(false).is_empty());
        assert_eq!(wm.read_slot("identity").unwrap().content, "I am Meridian.");
    }

    #[test]
    fn stats_reflect_current_usage() {
        let mut wm = WorkingMemory::default();
        wm.set_identity("short identity");
        wm.add_message("user", "hello there");
        let stats = wm.get_stats();
        assert_eq!(stats.message_count, 1);
        assert!(stats.total_tokens > 0);
        assert!(stats.within_limit);
    }
}
