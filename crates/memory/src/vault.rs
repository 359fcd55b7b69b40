use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::UnboundedSender;

use crate::schema::{MemoryEntry, MemoryTier};

#[derive(Debug, Clone)]
pub struct VaultExportSummary {
    pub root: String,
    pub note_count: usize,
    pub topic_count: usize,
    pub daily_note_count: usize,
}

// ── YAML KV summaries ────────────────────────────────────────────────────────

/// Filename of the Core-tier YAML KV summary (identity, always-true facts).
pub const KV_CORE: &str = "core.yaml";
/// Filename of the UserProfile-tier YAML KV summary (preferences, goals).
pub const KV_USER_PROFILE: &str = "user_profile.yaml";
/// Filename of the Reflective-tier YAML KV summary (agent's own thoughts).
pub const KV_REFLECTIVE: &str = "reflective.yaml";
/// Filename of the free-form narrative summary, regenerated on every sleep cycle.
pub const NARRATIVE_MD: &str = "MEMORY.md";
/// Every file the vault watcher and checksum verifier track.
pub const WATCHED_SUMMARIES: [&str; 4] = [KV_CORE, KV_USER_PROFILE, KV_REFLECTIVE, NARRATIVE_MD];
/// Default maximum entries per tier written into a YAML KV summary.
pub const KV_TIER_LIMIT: usize = 40;

/// Checksum verification result for one watched vault file.
#[derive(Debug, Clone)]
pub struct VaultFileStatus {
    pub filename: String,
    /// `true` when the file's content checksum matches the one recorded in
    /// its header comment, or when no checksum header is present yet
    /// (a file we haven't written). `false` means a human edited it since
    /// our last sync — the next sleep cycle should reconcile it.
    pub valid: bool,
}

/// Emitted by [`spawn_vault_watcher`] when a watched file's content changes
/// on disk for a reason other than our own [`sync_kv_summaries`] write.
#[derive(Debug, Clone)]
pub struct VaultEditEvent {
    pub filename: String,
    pub content: String,
}

fn checksum_header(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("# checksum: {:x}\n", digest)
}

fn split_checksum_header(raw: &str) -> (Option<&str>, &str) {
    if let Some(rest) = raw.strip_prefix("# checksum: ") {
        if let Some(nl) = rest.find('\n') {
            return (Some(rest[..nl].trim()), &rest[nl + 1..]);
        }
    }
    (None, raw)
}

fn kv_entries_yaml(entries: &[&MemoryEntry], limit: usize) -> String {
    let mut sorted: Vec<&&MemoryEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut out = String::from("entries:\n");
    for entry in sorted.into_iter().take(limit) {
        out.push_str(&format!(
            "  - id: {}\n    source: {}\n    confidence: {:.2}\n    content: {:?}\n",
            entry.id, entry.source, entry.current_confidence, entry.content,
        ));
    }
    out
}

/// Write the three YAML KV summaries (Core, UserProfile, Reflective) plus a
/// narrative `MEMORY.md`, skipping any file whose content would be unchanged
/// (tracked via a SHA-256 checksum in its header comment). Returns the
/// number of files actually written.
pub fn sync_kv_summaries(entries: &[MemoryEntry], root: impl AsRef<Path>, tier_limit: usize) -> Result<usize> {
    let root = root.as_ref();
    fs::create_dir_all(root)?;

    let core: Vec<&MemoryEntry> = entries.iter().filter(|e| e.tier == MemoryTier::Core).collect();
    let user_profile: Vec<&MemoryEntry> = entries.iter().filter(|e| e.tier == MemoryTier::UserProfile).collect();
    let reflective: Vec<&MemoryEntry> = entries.iter().filter(|e| e.tier == MemoryTier::Reflective).collect();

    let mut written = 0;
    written += write_if_changed(root, KV_CORE, &kv_entries_yaml(&core, tier_limit))?;
    written += write_if_changed(root, KV_USER_PROFILE, &kv_entries_yaml(&user_profile, tier_limit))?;
    written += write_if_changed(root, KV_REFLECTIVE, &kv_entries_yaml(&reflective, tier_limit))?;

    let narrative = render_narrative(&core, &user_profile, &reflective);
    written += write_if_changed(root, NARRATIVE_MD, &narrative)?;

    Ok(written)
}

fn write_if_changed(root: &Path, filename: &str, body: &str) -> Result<usize> {
    let path = root.join(filename);
    let new_content = format!("{}{body}", checksum_header(body));
    if let Ok(existing) = fs::read_to_string(&path) {
        let (_, existing_body) = split_checksum_header(&existing);
        if existing_body == body {
            return Ok(0);
        }
    }
    fs::write(path, new_content)?;
    Ok(1)
}

fn render_narrative(core: &[&MemoryEntry], user_profile: &[&MemoryEntry], reflective: &[&MemoryEntry]) -> String {
    let mut out = String::from("# Memory Narrative\n\n");
    out.push_str("## Who I am\n");
    for entry in core.iter().take(10) {
        out.push_str(&format!("- {}\n", entry.content));
    }
    out.push_str("\n## What I know about you\n");
    for entry in user_profile.iter().take(20) {
        out.push_str(&format!("- {}\n", entry.content));
    }
    out.push_str("\n## What I've been thinking\n");
    for entry in reflective.iter().take(20) {
        out.push_str(&format!("- {}\n", entry.content));
    }
    out
}

/// Verify the checksum header of every [`WATCHED_SUMMARIES`] file against its
/// own body. A missing file is reported `valid: true` (nothing to reconcile
/// yet); a present file whose body doesn't match its recorded checksum means
/// it was edited outside of [`sync_kv_summaries`].
pub fn check_vault_checksums(root: impl AsRef<Path>) -> Vec<VaultFileStatus> {
    let root = root.as_ref();
    WATCHED_SUMMARIES
        .iter()
        .map(|&filename| {
            let valid = match fs::read_to_string(root.join(filename)) {
                Ok(raw) => {
                    let (recorded, body) = split_checksum_header(&raw);
                    match recorded {
                        Some(recorded) => {
                            let actual = format!("{:x}", Sha256::digest(body.as_bytes()));
                            recorded == actual
                        }
                        None => true,
                    }
                }
                Err(_) => true,
            };
            VaultFileStatus { filename: filename.to_string(), valid }
        })
        .collect()
}

/// Read the Core + UserProfile KV summaries and condense them into a short
/// block for prompt injection, guaranteeing identity survives even when
/// retrieval ranking would otherwise miss Core entries. Returns `None` if
/// neither summary exists yet.
pub fn read_kv_for_injection(root: impl AsRef<Path>) -> Option<String> {
    let root = root.as_ref();
    let core = fs::read_to_string(root.join(KV_CORE)).ok();
    let profile = fs::read_to_string(root.join(KV_USER_PROFILE)).ok();
    if core.is_none() && profile.is_none() {
        return None;
    }
    let mut block = String::new();
    if let Some(core) = core {
        let (_, body) = split_checksum_header(&core);
        block.push_str(body.trim());
    }
    if let Some(profile) = profile {
        let (_, body) = split_checksum_header(&profile);
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(body.trim());
    }
    if block.trim().is_empty() { None } else { Some(block) }
}

/// Watch the vault directory for edits to any [`WATCHED_SUMMARIES`] file made
/// outside of [`sync_kv_summaries`] (e.g. a human editing `core.yaml` by
/// hand) and forward the new content as a [`VaultEditEvent`].
///
/// Our own writes stamp a checksum header matching their own body, so a file
/// we wrote never produces an event — only a body whose checksum diverges
/// from its own header (or has none at all) is treated as an external edit.
pub fn spawn_vault_watcher(root: PathBuf, tx: UnboundedSender<VaultEditEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _ = fs::create_dir_all(&root);
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();

        let mut watcher = match notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        }) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(?err, "vault watcher: failed to create filesystem watcher");
                return;
            }
        };
        if let Err(err) = notify::Watcher::watch(&mut watcher, &root, notify::RecursiveMode::NonRecursive) {
            tracing::warn!(?err, path = %root.display(), "vault watcher: failed to watch vault directory");
            return;
        }

        loop {
            let root = root.clone();
            let event = match tokio::task::spawn_blocking(move || raw_rx.recv()).await {
                Ok(Ok(event)) => event,
                _ => return,
            };
            let Ok(event) = event else { continue };
            if !matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                continue;
            }
            for path in &event.paths {
                let Some(filename) = path.file_name().and_then(|n| n.to_str()) else { continue };
                if !WATCHED_SUMMARIES.contains(&filename) {
                    continue;
                }
                let Ok(raw) = fs::read_to_string(root.join(filename)) else { continue };
                let (recorded, body) = split_checksum_header(&raw);
                let actual = format!("{:x}", Sha256::digest(body.as_bytes()));
                if recorded == Some(actual.as_str()) {
                    continue;
                }
                if tx.send(VaultEditEvent { filename: filename.to_string(), content: body.to_string() }).is_err() {
                    return;
                }
            }
        }
    })
}

pub fn export_obsidian_vault(
    entries: &[MemoryEntry],
    root: impl AsRef<Path>,
) -> Result<VaultExportSummary> {
    let root = root.as_ref();
    if root.exists() {
        fs::remove_dir_all(root)?;
    }

    let notes_dir = root.join("notes");
    let tiers_dir = root.join("tiers");
    let daily_dir = root.join("daily");
    let topics_dir = root.join("topics");
    fs::create_dir_all(&notes_dir)?;
    fs::create_dir_all(&tiers_dir)?;
    fs::create_dir_all(&daily_dir)?;
    fs::create_dir_all(&topics_dir)?;

    let mut tier_links: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut daily_links: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut topic_backlinks: HashMap<String, BTreeSet<String>> = HashMap::new();

    let mut sorted = entries.to_vec();
    sorted.sort_by(|left, right| right.created_at.cmp(&left.created_at));

    for entry in &sorted {
        let note_name = note_name(entry);
        let note_file = notes_dir.join(format!("{note_name}.md"));
        let day = entry.created_at.format("%Y-%m-%d").to_string();
        let tier_label = tier_slug(entry.tier);
        let topics = extract_topics(&entry.content);

        let topic_links = if topics.is_empty() {
            "(none)".to_string()
        } else {
            topics
                .iter()
                .map(|topic| format!("[[topic-{topic}]]"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let note_body = format!(
            "---\nid: {}\ntier: {}\nsource: {}\nconfidence: {:.2}\nvalence: {:.2}\ncreated_at: {}\nprovenance_hash: {}\n---\n\n# {}\n\n{}\n\n## Topics\n{}\n\n## Links\n- [[index]]\n- [[tier-{}]]\n- [[day-{}]]\n",
            entry.id,
            tier_label,
            entry.source,
            entry.current_confidence,
            entry.valence,
            entry.created_at,
            entry.provenance_hash,
            note_name,
            entry.content,
            topic_links,
            tier_label,
            day,
        );
        fs::write(note_file, note_body)?;

        let note_link = format!("[[{note_name}]]");
        tier_links
            .entry(tier_label.to_string())
            .or_default()
            .push(note_link.clone());
        daily_links.entry(day).or_default().push(note_link.clone());
        for topic in topics {
            topic_backlinks
                .entry(topic)
                .or_default()
                .insert(note_link.clone());
        }
    }

    write_root_index(root, &tier_links, &daily_links, &topic_backlinks)?;
    write_tier_indexes(&tiers_dir, &tier_links)?;
    write_daily_notes(&daily_dir, &daily_links)?;
    write_topics(&topics_dir, &topic_backlinks)?;

    Ok(VaultExportSummary {
        root: root.display().to_string(),
        note_count: sorted.len(),
        topic_count: topic_backlinks.len(),
        daily_note_count: daily_links.len(),
    })
}

fn write_root_index(
    root: &Path,
    tier_links: &BTreeMap<String, Vec<String>>,
    daily_links: &BTreeMap<String, Vec<String>>,
    topic_backlinks: &HashMap<String, BTreeSet<String>>,
) -> Result<()> {
    let mut content = String::new();
    content.push_str("# Memory Vault Index\n\n");
    content.push_str("## Tiers\n");
    for tier in [
        MemoryTier::Core,
        MemoryTier::Semantic,
        MemoryTier::Episodic,
        MemoryTier::Procedural,
    ] {
        let slug = tier_slug(tier);
        let count = tier_links.get(slug).map(|items| items.len()).unwrap_or(0);
        content.push_str(&format!("- [[tier-{slug}]] ({count})\n"));
    }

    content.push_str("\n## Daily Notes\n");
    for day in daily_links.keys() {
        content.push_str(&format!("- [[day-{day}]]\n"));
    }

    content.push_str("\n## Topics\n");
    let mut topics = topic_backlinks.keys().cloned().collect::<Vec<_>>();
    topics.sort();
    for topic in topics {
        content.push_str(&format!("- [[topic-{topic}]]\n"));
    }

    fs::write(root.join("index.md"), content)?;
    Ok(())
}

fn write_tier_indexes(tiers_dir: &Path, tier_links: &BTreeMap<String, Vec<String>>) -> Result<()> {
    for tier in [
        MemoryTier::Core,
        MemoryTier::Semantic,
        MemoryTier::Episodic,
        MemoryTier::Procedural,
    ] {
        let slug = tier_slug(tier);
        let mut content = format!("# {} Memories\n\n", slug.to_uppercase());
        let links = tier_links.get(slug).cloned().unwrap_or_default();
        if links.is_empty() {
            content.push_str("(none)\n");
        } else {
            for link in links {
                content.push_str(&format!("- {link}\n"));
            }
        }

        fs::write(tiers_dir.join(format!("tier-{slug}.md")), content)?;
    }
    Ok(())
}

fn write_daily_notes(daily_dir: &Path, daily_links: &BTreeMap<String, Vec<String>>) -> Result<()> {
    for (day, links) in daily_links {
        let mut content = format!("# Daily Memory {day}\n\n");
        for link in links {
            content.push_str(&format!("- {link}\n"));
        }
        fs::write(daily_dir.join(format!("day-{day}.md")), content)?;
    }
    Ok(())
}

fn write_topics(
    topics_dir: &Path,
    topic_backlinks: &HashMap<String, BTreeSet<String>>,
) -> Result<()> {
    let mut topics = topic_backlinks.keys().cloned().collect::<Vec<_>>();
    topics.sort();

    for topic in topics {
        let mut content = format!("# Topic: {topic}\n\n## Backlinks\n");
        if let Some(links) = topic_backlinks.get(&topic) {
            for link in links {
                content.push_str(&format!("- {link}\n"));
            }
        }

        fs::write(topics_dir.join(format!("topic-{topic}.md")), content)?;
    }

    Ok(())
}

fn note_name(entry: &MemoryEntry) -> String {
    let date = entry.created_at.format("%Y%m%d").to_string();
    let id_short = entry.id.to_string().chars().take(8).collect::<String>();
    format!("{date}-{}-{id_short}", tier_slug(entry.tier))
}

fn tier_slug(tier: MemoryTier) -> &'static str {
    tier.slug()
}

fn extract_topics(content: &str) -> Vec<String> {
    let stopwords = [
        "about", "after", "agent", "meridian", "because", "before", "could", "there", "their",
        "these", "those", "would", "should", "where", "which", "while", "memory", "system",
        "using", "please", "today", "night", "sleep", "model", "provider", "think", "level",
    ];
    let stop = stopwords.iter().copied().collect::<BTreeSet<_>>();

    let mut counts = HashMap::<String, usize>::new();
    for token in content
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.len() >= 4)
        .map(|word| word.to_lowercase())
        .filter(|word| !stop.contains(word.as_str()))
    {
        *counts.entry(token).or_default() += 1;
    }

    let mut topics = counts.into_iter().collect::<Vec<_>>();
    topics.sort_by(|(left_word, left_count), (right_word, right_count)| {
        right_count
            .cmp(left_count)
            .then_with(|| left_word.cmp(right_word))
    });

    topics
        .into_iter()
        .take(6)
        .map(|(word, _)| sanitize_topic_slug(&word))
        .collect()
}

fn sanitize_topic_slug(raw: &str) -> String {
    let mut slug = raw
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect::<String>();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').to_string()
}
