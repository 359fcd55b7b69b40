use std::collections::HashMap;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::schema::{MemoryEntry, MemoryTier};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
    seen_ids: HashSet<String>,
    /// Maps entry UUID → index in `entries` for O(1) lookup.
    by_id: HashMap<Uuid, usize>,
}

impl MemoryStore {
    pub fn insert(&mut self, entry: MemoryEntry) -> bool {
        let entry_id = entry.id.to_string();
        if self.seen_ids.contains(&entry_id) {
            return false;
        }

        let idx = self.entries.len();
        self.by_id.insert(entry.id, idx);
        self.seen_ids.insert(entry_id);
        self.entries.push(entry);
        true
    }

    pub fn all(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// O(1) lookup of a single entry by UUID.
    pub fn get(&self, id: Uuid) -> Option<&MemoryEntry> {
        self.by_id.get(&id).and_then(|&i| self.entries.get(i))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen_ids.clear();
        self.by_id.clear();
    }

    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&MemoryEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(entry));
        // Rebuild both lookup structures after retain.
        self.seen_ids = self.entries.iter().map(|e| e.id.to_string()).collect();
        self.by_id = self.entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a single entry by its full UUID.
    ///
    /// Returns `true` if the entry was found and removed, `false` otherwise.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() < before {
            self.seen_ids.remove(&id.to_string());
            self.by_id.remove(&id);
            // Remap positions for entries that shifted.
            self.by_id = self.entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
            true
        } else {
            false
        }
    }

    /// Return the ids of redundant entries sharing the same `(tier,
    /// normalised content)` as another entry — the newest by `created_at` in
    /// each group is kept; every other id in the group is returned as a
    /// duplicate to purge.
    pub fn find_content_duplicates(&self) -> Vec<Uuid> {
        let mut groups: HashMap<(&'static str, String), Vec<&MemoryEntry>> = HashMap::new();
        for entry in &self.entries {
            let key = (entry.tier.slug(), normalize_content(&entry.content));
            groups.entry(key).or_default().push(entry);
        }

        let mut dupes = Vec::new();
        for mut group in groups.into_values() {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            dupes.extend(group.iter().skip(1).map(|e| e.id));
        }
        dupes
    }

    /// Recompute `current_confidence` for every entry in `tier` created
    /// before `cutoff`, using each entry's own [`ConfidenceLevel`] decay
    /// rate evaluated at `now`. Returns the number of entries actually
    /// changed.
    pub fn decay_stale_confidence(
        &mut self,
        tier: MemoryTier,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut touched = 0;
        for entry in &mut self.entries {
            if entry.tier == tier && entry.created_at < cutoff {
                let next = entry.decayed_confidence(now);
                if next != entry.current_confidence {
                    entry.current_confidence = next;
                    touched += 1;
                }
            }
        }
        touched
    }

    /// Update the `valence` field of the first entry whose UUID string starts
    /// with `id_short` (the first N chars used as a short identifier).
    ///
    /// The value is clamped to `[-1.0, 1.0]`.  Returns `true` if an entry
    /// was found and updated.
    pub fn update_valence_by_id_short(&mut self, id_short: &str, valence: f32) -> bool {
        for entry in &mut self.entries {
            if entry.id.to_string().starts_with(id_short) {
                entry.valence = valence.clamp(-1.0, 1.0);
                return true;
            }
        }
        false
    }
}

/// Normalise content for duplicate detection: trims and lowercases so
/// trivial whitespace/casing differences don't defeat deduplication.
fn normalize_content(content: &str) -> String {
    content.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ConfidenceLevel;
    use chrono::{Duration, Utc};

    fn entry(content: &str, age_hours: i64) -> MemoryEntry {
        MemoryEntry {
            id: Uuid::new_v4(),
            tier: MemoryTier::Episodic,
            content: content.to_string(),
            source: "test".to_string(),
            memory_type: "observation".to_string(),
            confidence_level: ConfidenceLevel::Event,
            initial_confidence: 0.7,
            current_confidence: 0.7,
            valence: 0.0,
            created_at: Utc::now() - Duration::hours(age_hours),
            last_accessed: Utc::now(),
            access_count: 0,
            provenance_hash: "hash".to_string(),
            tags: Vec::new(),
            embedding: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn find_content_duplicates_keeps_newest_and_flags_rest() {
        let mut store = MemoryStore::default();
        let older = entry("Same Content", 5);
        let newer = entry("same content", 1);
        let unrelated = entry("different content", 1);
        store.insert(older.clone());
        store.insert(newer.clone());
        store.insert(unrelated.clone());

        let dupes = store.find_content_duplicates();
        assert_eq!(dupes, vec![older.id]);
    }

    #[test]
    fn find_content_duplicates_empty_when_no_overlap() {
        let mut store = MemoryStore::default();
        store.insert(entry("alpha", 1));
        store.insert(entry("beta", 1));
        assert!(store.find_content_duplicates().is_empty());
    }
}
