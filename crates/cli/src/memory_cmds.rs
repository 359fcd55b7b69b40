use std::io;
use std::io::IsTerminal;
use std::io::Write;

use anyhow::{Result, bail};

use meridian_memory::{MemoryManager, MemoryTier};

use crate::CliMemoryLayer;

pub(crate) async fn run_memory_wipe(memory: &mut MemoryManager, layer: CliMemoryLayer, yes: bool) -> Result<()> {
    let targets = layer_to_tiers(layer);
    let total = memory.all().len();
    let target_count = if matches!(layer, CliMemoryLayer::All) {
        total
    } else {
        memory.all().iter().filter(|entry| targets.contains(&entry.tier)).count()
    };

    println!("destructive operation: memory wipe");
    println!("- selected layer: {}", memory_layer_label(layer));
    println!("- targeted entries: {target_count}");
    println!("- total entries: {total}");
    println!(
        "- by tier: episodic={} semantic={} procedural={} core={}",
        memory.entries_by_tier(MemoryTier::Episodic).len(),
        memory.entries_by_tier(MemoryTier::Semantic).len(),
        memory.entries_by_tier(MemoryTier::Procedural).len(),
        memory.entries_by_tier(MemoryTier::Core).len(),
    );

    if target_count == 0 {
        println!("no matching memory entries to wipe");
        return Ok(());
    }

    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing destructive wipe in non-interactive mode without --yes");
        }

        let expected = format!("WIPE {}", memory_layer_label(layer).to_uppercase());
        print!("This permanently deletes memory from the event log. Type '{expected}' to continue: ");
        io::stdout().flush()?;

        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != expected {
            println!("memory wipe cancelled");
            return Ok(());
        }
    }

    let removed = if matches!(layer, CliMemoryLayer::All) {
        memory.wipe_all().await?
    } else {
        memory.wipe_tiers(&targets).await?
    };

    println!("memory wipe complete: removed {removed} entries");
    println!("remaining entries: {}", memory.all().len());
    Ok(())
}

pub(crate) fn run_memory_stats(memory: &MemoryManager) {
    let stats = memory.stats();
    println!("── memory stats ─────────────────────────────────────");
    println!("  total:        {}", stats.total);
    println!("  core:         {}", stats.core);
    println!("  user_profile: {}", stats.user_profile);
    println!("  reflective:   {}", stats.reflective);
    println!("  semantic:     {}", stats.semantic);
    println!("  procedural:   {}", stats.procedural);
    println!("  episodic:     {}", stats.episodic);

    {
        let tool_entries = memory.entries_by_tier(MemoryTier::Procedural);
        let tool_execs: Vec<_> = tool_entries.iter().filter(|e| e.source.starts_with("tool-execution:")).collect();
        let tool_total = tool_execs.len();
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(24);
        let tool_today = tool_execs.iter().filter(|e| e.created_at > cutoff).count();
        println!();
        println!("── tool executions ──────────────────────────────────");
        println!("  today (24h): {tool_today}");
        println!("  all time:    {tool_total}");
        if tool_total > 0 {
            let mut by_tool: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
            for e in &tool_execs {
                let tool_name = e.source.trim_start_matches("tool-execution:");
                *by_tool.entry(tool_name).or_insert(0) += 1;
            }
            for (t, n) in &by_tool {
                println!("    {t}: {n}");
            }
        }
    }

    println!();
    println!("── search index ─────────────────────────────────────");
    match (stats.index_size, stats.index_cache) {
        (Some(size), Some(cache)) => {
            println!("  entries:    {size}");
            println!("  cache cap:  {}", cache.capacity);
            println!("  cache len:  {}", cache.len);
            println!("  hits:       {}", cache.hits);
            println!("  misses:     {}", cache.misses);
            println!("  hit rate:   {:.1}%", cache.hit_rate_pct);
        }
        _ => println!("  (index not enabled for this manager instance)"),
    }

    println!();
    println!("── vault checksums ──────────────────────────────────");
    if stats.vault_files.is_empty() {
        println!("  (vault not configured)");
    } else {
        for f in &stats.vault_files {
            let status = if f.valid { "OK" } else { "MODIFIED (human edit detected)" };
            println!("  {:<28}  {status}", f.filename);
        }
    }
}

pub(crate) fn run_memory_inspect_core(memory: &MemoryManager, limit: usize) {
    let mut entries = memory.entries_by_tier(MemoryTier::Core);
    entries.sort_by(|left, right| right.created_at.cmp(&left.created_at));

    println!("core memories (latest {limit})");
    for (index, entry) in entries.into_iter().take(limit).enumerate() {
        println!("{}. [{}] {}", index + 1, entry.created_at, entry.content);
    }
}

pub(crate) fn run_memory_promotions(memory: &MemoryManager, limit: usize) {
    let entries = memory.recent_promotions(limit);
    println!("memory promotions (latest {})", entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        println!("{}. [{}] {:?} {} (source={})", index + 1, entry.created_at, entry.tier, entry.content, entry.source);
    }
}

pub(crate) fn run_memory_export_vault(memory: &MemoryManager, path: &str) -> Result<()> {
    let summary = memory.export_vault(path)?;
    println!("memory vault export complete");
    println!("- root: {}", summary.root);
    println!("- notes: {}", summary.note_count);
    println!("- topics: {}", summary.topic_count);
    println!("- daily notes: {}", summary.daily_note_count);
    Ok(())
}

pub(crate) fn layer_to_tiers(layer: CliMemoryLayer) -> Vec<MemoryTier> {
    match layer {
        CliMemoryLayer::All => vec![MemoryTier::Episodic, MemoryTier::Semantic, MemoryTier::Procedural, MemoryTier::Core],
        CliMemoryLayer::Episodic => vec![MemoryTier::Episodic],
        CliMemoryLayer::Semantic => vec![MemoryTier::Semantic],
        CliMemoryLayer::Procedural => vec![MemoryTier::Procedural],
        CliMemoryLayer::Core => vec![MemoryTier::Core],
    }
}

pub(crate) fn memory_layer_label(layer: CliMemoryLayer) -> &'static str {
    match layer {
        CliMemoryLayer::All => "all",
        CliMemoryLayer::Episodic => "episodic",
        CliMemoryLayer::Semantic => "semantic",
        CliMemoryLayer::Procedural => "procedural",
        CliMemoryLayer::Core => "core",
    }
}
