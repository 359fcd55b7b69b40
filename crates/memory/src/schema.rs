use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Below this decayed confidence an entry is eligible for forgetting.
pub const FORGETTING_THRESHOLD: f32 = 0.3;

/// How fast an entry's confidence decays with age. Each level's per-day
/// decay rate comes straight from the cognitive-memory model this crate is
/// built on: facts barely decay, gossip decays fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Fact,
    Summary,
    Belief,
    Event,
    Gossip,
}

impl ConfidenceLevel {
    pub fn decay_rate(self) -> f32 {
        match self {
            Self::Fact => 0.008,
            Self::Summary => 0.025,
            Self::Belief => 0.07,
            Self::Event => 0.15,
            Self::Gossip => 0.20,
        }
    }
}

impl Default for ConfidenceLevel {
    fn default() -> Self {
        Self::Event
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryTier {
    Episodic,
    Semantic,
    Procedural,
    /// Durable facts about the user (preferences, goals, relationship facts).
    UserProfile,
    /// The agent's own thoughts, plans, and self-critiques.
    Reflective,
    Core,
}

impl MemoryTier {
    /// Parse a tier name as used in LLM-facing prompts (e.g. the agentic
    /// sleep promotion/free-memory directives), case-insensitive and
    /// tolerant of `-`/`_` separators (`user_profile`, `user-profile`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            "userprofile" => Some(Self::UserProfile),
            "reflective" => Some(Self::Reflective),
            "core" => Some(Self::Core),
            _ => None,
        }
    }

    /// Stable lowercase slug used as a storage/lookup key (index tier table,
    /// vault note filenames) and in human-facing tier labels.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::UserProfile => "user-profile",
            Self::Reflective => "reflective",
            Self::Core => "core",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub tier: MemoryTier,
    pub content: String,
    pub source: String,
    /// Open-ended category label (e.g. "observation", "preference",
    /// "instruction") — unlike [`MemoryTier`] this isn't a closed set.
    #[serde(default = "default_memory_type")]
    pub memory_type: String,
    pub confidence_level: ConfidenceLevel,
    /// Confidence at the moment this entry was recorded; decay is applied
    /// relative to this, never to `current_confidence` directly.
    pub initial_confidence: f32,
    pub current_confidence: f32,
    pub valence: f32,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_last_accessed")]
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
    pub provenance_hash: String,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_memory_type() -> String {
    "observation".to_string()
}

fn default_last_accessed() -> DateTime<Utc> {
    Utc::now()
}

impl MemoryEntry {
    /// Confidence decayed by elapsed time since `created_at`, evaluated at
    /// `now`, plus a small access-frequency boost: `min(1.0, initial *
    /// (1 - decay_rate)^days_elapsed + min(0.1, access_count * 0.01))`.
    pub fn decayed_confidence(&self, now: DateTime<Utc>) -> f32 {
        let days_elapsed = (now - self.created_at).num_seconds() as f32 / 86_400.0;
        let decay_rate = self.confidence_level.decay_rate();
        let decayed = self.initial_confidence * (1.0 - decay_rate).powf(days_elapsed.max(0.0));
        let freq_boost = (self.access_count as f32 * 0.01).min(0.1);
        (decayed + freq_boost).min(1.0)
    }

    pub fn should_forget(&self, now: DateTime<Utc>) -> bool {
        self.decayed_confidence(now) < FORGETTING_THRESHOLD
    }

    /// Record a retrieval: bumps `last_accessed`/`access_count` and
    /// recomputes `current_confidence` from the decay curve.
    pub fn access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
        self.current_confidence = self.decayed_confidence(now);
    }
}

/// Truncate a string to at most `max_chars` Unicode scalar values.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
