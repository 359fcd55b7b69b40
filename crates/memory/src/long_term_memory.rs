//! Long-term memory: a vector-capable primary store with a transparent
//! file-based fallback.
//!
//! [`crate::index::MemoryIndex`] (redb) is the fast path, plain files are the
//! degraded path; [`LongTermMemory`] is a single facade that owns the
//! routing policy itself instead of leaving it to the caller. Once the
//! fallback is latched (a primary write failed) it stays latched for the
//! rest of the process; reads that hit a primary error fall back for that
//! call only, without latching.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::schema::{ConfidenceLevel, MemoryEntry};

const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ltm_metadata");
const VECTOR_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ltm_vectors");

/// Aggregate counts reported by [`LongTermMemory::get_stats`].
#[derive(Debug, Clone, Default)]
pub struct LongTermMemoryStats {
    pub total: usize,
    pub with_vectors: usize,
    pub using_fallback: bool,
}

// ── Primary store ────────────────────────────────────────────────────────────

/// Single-file embedded store: a metadata table and a vector table, both
/// keyed by entry UUID. Brute-force KNN over the vector table — fine at the
/// single-user scale this crate targets; there is no index to go stale.
struct PrimaryMemoryStore {
    db: Database,
}

impl PrimaryMemoryStore {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)
            .with_context(|| format!("opening long-term memory store at {}", path.display()))?;
        {
            let tx = db.begin_write()?;
            tx.open_table(METADATA_TABLE)?;
            tx.open_table(VECTOR_TABLE)?;
            tx.commit()?;
        }
        Ok(Self { db })
    }

    fn store(&self, entry: &MemoryEntry) -> Result<()> {
        let id = entry.id.to_string();
        // Embedding lives in its own table; metadata never carries it.
        let mut metadata = entry.clone();
        metadata.embedding = None;
        let bytes = serde_json::to_vec(&metadata)?;

        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(METADATA_TABLE)?;
            tbl.insert(id.as_str(), bytes.as_slice())?;
        }
        if let Some(embedding) = &entry.embedding {
            let vec_bytes = bincode::serde::encode_to_vec(embedding, bincode::config::standard())
                .context("encoding embedding vector")?;
            let mut tbl = tx.open_table(VECTOR_TABLE)?;
            tbl.insert(id.as_str(), vec_bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<MemoryEntry>> {
        let id_str = id.to_string();
        let tx = self.db.begin_read()?;
        let meta_tbl = tx.open_table(METADATA_TABLE)?;
        let Some(meta_bytes) = meta_tbl.get(id_str.as_str())? else { return Ok(None) };
        let mut entry: MemoryEntry = serde_json::from_slice(meta_bytes.value())?;
        let vec_tbl = tx.open_table(VECTOR_TABLE)?;
        if let Some(vec_bytes) = vec_tbl.get(id_str.as_str())? {
            let (embedding, _): (Vec<f32>, usize) =
                bincode::serde::decode_from_slice(vec_bytes.value(), bincode::config::standard())
                    .context("decoding embedding vector")?;
            entry.embedding = Some(embedding);
        }
        Ok(Some(entry))
    }

    fn all_metadata(&self) -> Result<Vec<MemoryEntry>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(METADATA_TABLE)?;
        let mut out = Vec::new();
        for row in tbl.iter()? {
            let (_, v) = row?;
            out.push(serde_json::from_slice::<MemoryEntry>(v.value())?);
        }
        Ok(out)
    }

    fn search_by_vector(
        &self,
        query_vec: &[f32],
        top_k: usize,
        min_confidence: f32,
    ) -> Result<Vec<(MemoryEntry, f32)>> {
        let tx = self.db.begin_read()?;
        let meta_tbl = tx.open_table(METADATA_TABLE)?;
        let vec_tbl = tx.open_table(VECTOR_TABLE)?;

        let mut scored: Vec<(MemoryEntry, f32)> = Vec::new();
        for row in vec_tbl.iter()? {
            let (k, v) = row?;
            let id = k.value();
            let Some(meta_bytes) = meta_tbl.get(id)? else { continue };
            let entry: MemoryEntry = serde_json::from_slice(meta_bytes.value())?;
            if entry.current_confidence < min_confidence {
                continue;
            }
            let (vec, _): (Vec<f32>, usize) =
                bincode::serde::decode_from_slice(v.value(), bincode::config::standard())?;
            let distance = euclidean_distance(&vec, query_vec);
            let score = 1.0 / (1.0 + distance);
            scored.push((entry, score));
        }
        scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn search_by_keyword(&self, keyword: &str, top_k: usize) -> Result<Vec<MemoryEntry>> {
        let keyword_lower = keyword.to_lowercase();
        let mut matches: Vec<MemoryEntry> = self
            .all_metadata()?
            .into_iter()
            .filter(|e| e.content.to_lowercase().contains(&keyword_lower))
            .collect();
        matches.sort_by(|a, b| {
            b.current_confidence
                .total_cmp(&a.current_confidence)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    fn get_recent(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut all = self.all_metadata()?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    fn get_between(&self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut all: Vec<MemoryEntry> = self
            .all_metadata()?
            .into_iter()
            .filter(|e| after.is_none_or(|a| e.created_at >= a))
            .filter(|e| before.is_none_or(|b| e.created_at <= b))
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let id_str = id.to_string();
        let tx = self.db.begin_write()?;
        let removed = {
            let mut meta_tbl = tx.open_table(METADATA_TABLE)?;
            meta_tbl.remove(id_str.as_str())?.is_some()
        };
        {
            let mut vec_tbl = tx.open_table(VECTOR_TABLE)?;
            vec_tbl.remove(id_str.as_str())?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let tx = self.db.begin_read()?;
        Ok(tx.open_table(METADATA_TABLE)?.len()? as usize)
    }

    fn vector_count(&self) -> Result<usize> {
        let tx = self.db.begin_read()?;
        Ok(tx.open_table(VECTOR_TABLE)?.len()? as usize)
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

// ── Fallback store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FallbackIndexEntry {
    content_preview: String,
    created_at: DateTime<Utc>,
}

/// Zero-dependency degraded store: one JSON file per entry plus a listing
/// index. Used whenever the primary redb store cannot be opened or a write
/// to it fails.
struct FallbackMemoryStore {
    data_dir: PathBuf,
    index: HashMap<Uuid, FallbackIndexEntry>,
}

impl FallbackMemoryStore {
    fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        let index_path = data_dir.join("index.json");
        let index = match fs::read_to_string(&index_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Ok(Self { data_dir, index })
    }

    fn entry_path(&self, id: Uuid) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    fn save_index(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.index)?;
        fs::write(self.data_dir.join("index.json"), raw)?;
        Ok(())
    }

    fn store(&mut self, entry: &MemoryEntry) -> Result<()> {
        let raw = serde_json::to_string_pretty(entry)?;
        fs::write(self.entry_path(entry.id), raw)?;
        self.index.insert(
            entry.id,
            FallbackIndexEntry {
                content_preview: entry.content.chars().take(100).collect(),
                created_at: entry.created_at,
            },
        );
        self.save_index()?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> Option<MemoryEntry> {
        let raw = fs::read_to_string(self.entry_path(id)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn all(&self) -> Vec<MemoryEntry> {
        self.index.keys().filter_map(|id| self.get(*id)).collect()
    }

    fn search_by_keyword(&self, keyword: &str, top_k: usize) -> Vec<MemoryEntry> {
        let query_terms: Vec<String> = keyword.to_lowercase().split_whitespace().map(String::from).collect();
        if query_terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(MemoryEntry, f32)> = self
            .all()
            .into_iter()
            .filter_map(|entry| {
                let content_lower = entry.content.to_lowercase();
                let matches = query_terms.iter().filter(|t| content_lower.contains(t.as_str())).count();
                if matches == 0 {
                    None
                } else {
                    Some((entry, matches as f32 / query_terms.len() as f32))
                }
            })
            .collect();
        scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        scored.into_iter().take(top_k).map(|(entry, _)| entry).collect()
    }

    fn get_recent(&self, limit: usize) -> Vec<MemoryEntry> {
        let mut ids: Vec<Uuid> = self.index.keys().copied().collect();
        ids.sort_by(|a, b| self.index[b].created_at.cmp(&self.index[a].created_at));
        ids.truncate(limit);
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    fn delete(&mut self, id: Uuid) -> Result<bool> {
        let existed = self.index.remove(&id).is_some();
        if existed {
            let _ = fs::remove_file(self.entry_path(id));
            self.save_index()?;
        }
        Ok(existed)
    }

    fn count(&self) -> usize {
        self.index.len()
    }
}

// ── Routing facade ───────────────────────────────────────────────────────────

/// Vector-capable long-term memory with an always-available file fallback.
///
/// Routing policy: construction falls back transparently if the primary
/// store cannot be opened. A failed `store()` call latches `using_fallback`
/// for the remainder of the process (no auto-recovery). A failed read falls
/// back for that call only, without latching — a transient read error
/// shouldn't strand every future write in fallback mode.
pub struct LongTermMemory {
    primary: Option<PrimaryMemoryStore>,
    fallback: FallbackMemoryStore,
    using_fallback: bool,
}

impl LongTermMemory {
    pub fn open(primary_path: impl AsRef<Path>, fallback_dir: impl AsRef<Path>) -> Result<Self> {
        let fallback = FallbackMemoryStore::open(fallback_dir)?;
        match PrimaryMemoryStore::open(primary_path) {
            Ok(primary) => Ok(Self { primary: Some(primary), fallback, using_fallback: false }),
            Err(err) => {
                warn!(%err, "long-term memory primary store unavailable at startup — using file fallback");
                Ok(Self { primary: None, fallback, using_fallback: true })
            }
        }
    }

    pub fn is_using_fallback(&self) -> bool {
        self.using_fallback
    }

    pub fn store(&mut self, entry: &MemoryEntry) -> Result<()> {
        if !self.using_fallback {
            if let Some(primary) = &self.primary {
                match primary.store(entry) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        warn!(%err, id = %entry.id, "long-term memory primary store write failed — latching to fallback");
                        self.using_fallback = true;
                    }
                }
            }
        }
        self.fallback.store(entry)
    }

    pub fn get(&mut self, id: Uuid) -> Option<MemoryEntry> {
        if self.using_fallback {
            return self.fallback.get(id);
        }
        match self.primary.as_ref().map(|p| p.get(id)) {
            Some(Ok(found)) => found,
            Some(Err(err)) => {
                debug!(%err, %id, "long-term memory primary read failed — falling back for this read");
                self.fallback.get(id)
            }
            None => self.fallback.get(id),
        }
    }

    pub fn search_by_vector(
        &mut self,
        query_vec: &[f32],
        top_k: usize,
        min_confidence: f32,
    ) -> Vec<(MemoryEntry, f32)> {
        if self.using_fallback {
            // No vector search in fallback mode: degrades to empty, matching
            // the contract that callers already treat vector results as one
            // signal among several.
            return Vec::new();
        }
        match self.primary.as_ref().map(|p| p.search_by_vector(query_vec, top_k, min_confidence)) {
            Some(Ok(results)) => results,
            Some(Err(err)) => {
                warn!(%err, "long-term memory vector search failed");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn search_by_keyword(&mut self, keyword: &str, top_k: usize) -> Vec<MemoryEntry> {
        if self.using_fallback {
            return self.fallback.search_by_keyword(keyword, top_k);
        }
        match self.primary.as_ref().map(|p| p.search_by_keyword(keyword, top_k)) {
            Some(Ok(results)) => results,
            Some(Err(err)) => {
                debug!(%err, "long-term memory primary keyword search failed — falling back for this read");
                self.fallback.search_by_keyword(keyword, top_k)
            }
            None => self.fallback.search_by_keyword(keyword, top_k),
        }
    }

    pub fn get_recent(&mut self, limit: usize) -> Vec<MemoryEntry> {
        if self.using_fallback {
            return self.fallback.get_recent(limit);
        }
        match self.primary.as_ref().map(|p| p.get_recent(limit)) {
            Some(Ok(results)) => results,
            Some(Err(err)) => {
                debug!(%err, "long-term memory primary recent-scan failed — falling back for this read");
                self.fallback.get_recent(limit)
            }
            None => self.fallback.get_recent(limit),
        }
    }

    pub fn get_before(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<MemoryEntry>> {
        match &self.primary {
            Some(p) if !self.using_fallback => p.get_between(None, Some(before), limit),
            _ => Ok(self
                .fallback
                .all()
                .into_iter()
                .filter(|e| e.created_at <= before)
                .take(limit)
                .collect()),
        }
    }

    pub fn get_after(&self, after: DateTime<Utc>, limit: usize) -> Result<Vec<MemoryEntry>> {
        match &self.primary {
            Some(p) if !self.using_fallback => p.get_between(Some(after), None, limit),
            _ => Ok(self
                .fallback
                .all()
                .into_iter()
                .filter(|e| e.created_at >= after)
                .take(limit)
                .collect()),
        }
    }

    pub fn update(&mut self, entry: &MemoryEntry) -> Result<()> {
        self.store(entry)
    }

    pub fn delete(&mut self, id: Uuid) -> Result<bool> {
        if self.using_fallback {
            return self.fallback.delete(id);
        }
        match self.primary.as_ref().map(|p| p.delete(id)) {
            Some(Ok(removed)) => Ok(removed),
            Some(Err(err)) => {
                warn!(%err, %id, "long-term memory primary delete failed");
                self.fallback.delete(id)
            }
            None => self.fallback.delete(id),
        }
    }

    pub fn get_stats(&self) -> LongTermMemoryStats {
        if self.using_fallback {
            return LongTermMemoryStats {
                total: self.fallback.count(),
                with_vectors: 0,
                using_fallback: true,
            };
        }
        match &self.primary {
            Some(p) => LongTermMemoryStats {
                total: p.count().unwrap_or(0),
                with_vectors: p.vector_count().unwrap_or(0),
                using_fallback: false,
            },
            None => LongTermMemoryStats { total: self.fallback.count(), with_vectors: 0, using_fallback: true },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MemoryTier;

    fn sample(content: &str, confidence: f32, embedding: Option<Vec<f32>>) -> MemoryEntry {
        MemoryEntry {
            id: Uuid::new_v4(),
            tier: MemoryTier::Episodic,
            content: content.to_string(),
            source: "test".to_string(),
            memory_type: "observation".to_string(),
            confidence_level: ConfidenceLevel::Event,
            initial_confidence: confidence,
            current_confidence: confidence,
            valence: 0.0,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            provenance_hash: "hash".to_string(),
            tags: Vec::new(),
            embedding,
            metadata: std::collections::HashMap::new(),
        }
    }

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("meridian-ltm-{label}-{}", Uuid::new_v4()))
    }

    #[test]
    fn store_and_retrieve_round_trips_through_primary() -> Result<()> {
        let dir = temp_dir("roundtrip");
        let mut ltm = LongTermMemory::open(dir.join("ltm.redb"), dir.join("fallback"))?;
        let entry = sample("remember this", 0.8, Some(vec![1.0, 2.0, 3.0]));
        ltm.store(&entry)?;

        let fetched = ltm.get(entry.id).expect("entry should round-trip");
        assert_eq!(fetched.content, "remember this");
        assert_eq!(fetched.embedding, Some(vec![1.0, 2.0, 3.0]));
        assert!(!ltm.is_using_fallback());

        let _ = fs::remove_dir_all(dir);
        Ok(())
    }

    #[test]
    fn search_by_vector_ranks_closest_first() -> Result<()> {
        let dir = temp_dir("vector");
        let mut ltm = LongTermMemory::open(dir.join("ltm.redb"), dir.join("fallback"))?;
        let close = sample("close match", 0.9, Some(vec![1.0, 0.0]));
        let far = sample("far match", 0.9, Some(vec![10.0, 10.0]));
        ltm.store(&close)?;
        ltm.store(&far)?;

        let results = ltm.search_by_vector(&[1.0, 0.0], 2, 0.0);
        assert_eq!(results.first().map(|(e, _)| e.id), Some(close.id));

        let _ = fs::remove_dir_all(dir);
        Ok(())
    }

    #[test]
    fn search_by_keyword_orders_by_confidence_then_recency() -> Result<()> {
        let dir = temp_dir("keyword");
        let mut ltm = LongTermMemory::open(dir.join("ltm.redb"), dir.join("fallback"))?;
        let low = sample("roadmap discussion", 0.3, None);
        let high = sample("roadmap planning", 0.9, None);
        ltm.store(&low)?;
        ltm.store(&high)?;

        let results = ltm.search_by_keyword("roadmap", 5);
        assert_eq!(results.first().map(|e| e.id), Some(high.id));

        let _ = fs::remove_dir_all(dir);
        Ok(())
    }

    #[test]
    fn fallback_store_supports_keyword_search_without_primary() -> Result<()> {
        let dir = temp_dir("fallback-only");
        let mut fallback = FallbackMemoryStore::open(dir.join("fallback"))?;
        let entry = sample("user prefers milestone plans", 0.8, None);
        fallback.store(&entry)?;

        let results = fallback.search_by_keyword("milestone plans", 5);
        assert_eq!(results.first().map(|e| e.id), Some(entry.id));

        let _ = fs::remove_dir_all(dir);
        Ok(())
    }

    #[test]
    fn constructing_over_an_unwritable_primary_path_latches_fallback() -> Result<()> {
        let dir = temp_dir("bad-primary");
        fs::create_dir_all(&dir)?;
        // A directory where the primary db file is expected forces redb::Database::create to fail.
        let bad_primary_path = dir.join("not-a-file");
        fs::create_dir_all(&bad_primary_path)?;

        let ltm = LongTermMemory::open(&bad_primary_path, dir.join("fallback"))?;
        assert!(ltm.is_using_fallback());

        let _ = fs::remove_dir_all(dir);
        Ok(())
    }

    #[test]
    fn get_stats_reports_vector_backed_entries() -> Result<()> {
        let dir = temp_dir("stats");
        let mut ltm = LongTermMemory::open(dir.join("ltm.redb"), dir.join("fallback"))?;
        ltm.store(&sample("with vector", 0.7, Some(vec![0.1, 0.2])))?;
        ltm.store(&sample("without vector", 0.7, None))?;

        let stats = ltm.get_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.with_vectors, 1);
        assert!(!stats.using_fallback);

        let _ = fs::remove_dir_all(dir);
        Ok(())
    }
}
