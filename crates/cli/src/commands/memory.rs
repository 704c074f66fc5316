//! `memtier store | context | get | summarize | sweep | promote | evict | stats`

use super::Session;
use memtier_core::entry::Tier;
use memtier_core::metadata::Metadata;
use serde_json::json;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Parse repeated `KEY=VALUE` flags. Later keys do not overwrite earlier ones.
pub fn parse_meta(pairs: &[String]) -> Result<Metadata, String> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("metadata must look like KEY=VALUE, got '{pair}'"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("metadata key is empty in '{pair}'"));
        }
        metadata.append(key, value.trim());
    }
    Ok(metadata)
}

pub async fn store(session: &Session, text: String, tier: Option<&str>, meta: &[String]) -> CmdResult {
    let tier = tier.map(str::parse::<Tier>).transpose()?;
    let metadata = parse_meta(meta)?;
    let entry = session
        .manager
        .store(&session.scope, text, metadata, tier)
        .await?;

    session.emit(&entry, |e| {
        println!("✅ Stored {} in {}", e.id, e.tier);
        if let Some(expires) = e.expires_at {
            println!("   Expires: {}", expires.to_rfc3339());
        }
    })
}

pub async fn context(session: &Session, query: &str, budget: Option<usize>) -> CmdResult {
    let package = session
        .manager
        .get_context(&session.scope, query, budget)
        .await?;

    session.emit(&package, |p| {
        println!(
            "📦 Context for \"{query}\": {}/{} tokens ({:.0}%)",
            p.total_tokens,
            p.budget,
            p.utilization_pct()
        );
        println!();
        for block in &p.ordered_blocks {
            let cut = if block.truncated { ", truncated" } else { "" };
            println!("── {:?} {} ({} tokens{cut})", block.source, block.source_id, block.token_count);
            println!("{}", block.text);
            println!();
        }
        if !p.dropped.is_empty() {
            println!("Dropped:");
            for d in &p.dropped {
                println!("  {} {}", d.reason, d.source_id);
            }
        }
        for d in &p.degraded {
            println!("⚠️  {d:?}");
        }
    })
}

pub async fn get(session: &Session, id: &str) -> CmdResult {
    if let Some(entry) = session.manager.get_entry(&session.scope, id).await? {
        return session.emit(&entry, |e| {
            println!("{} [{}] accessed {}x", e.id, e.tier, e.access_count);
            println!("  Created: {}", e.created_at.to_rfc3339());
            for (key, value) in e.metadata.iter() {
                println!("  {key}: {value:?}");
            }
            println!();
            println!("{}", e.text);
        });
    }
    if let Some(tombstone) = session.manager.tombstone(&session.scope, id).await? {
        return session.emit(&tombstone, |t| {
            println!(
                "🪦 {} was {:?} from {} at {}",
                t.id,
                t.fate,
                t.tier,
                t.removed_at.to_rfc3339()
            );
        });
    }
    Err(format!("No entry or tombstone with id {id} in scope {}", session.scope).into())
}

pub async fn summarize(session: &Session) -> CmdResult {
    let report = session.manager.trigger_summarization(&session.scope).await?;

    session.emit(&report, |r| {
        if r.created.is_empty() {
            println!("Nothing to summarize");
        }
        for s in &r.created {
            println!("📝 Level {} summary {} over {} items", s.level, s.id, s.source_entry_ids.len());
            println!("   {}", s.text);
        }
        if !r.retained_raw.is_empty() {
            println!("⚠️  {} entries kept raw after failed windows", r.retained_raw.len());
        }
    })
}

pub async fn sweep(session: &Session) -> CmdResult {
    let report = session.manager.sweep_expired(&session.scope).await?;

    session.emit(&report, |r| {
        if r.is_empty() {
            println!("Nothing expired");
            return;
        }
        println!("🧹 Sweep of {}", session.scope);
        println!("  Promoted: {}", r.promoted.len());
        println!("  Evicted:  {}", r.evicted.len());
        if !r.deferred.is_empty() {
            println!("  Deferred: {} (promotion failed, retried next sweep)", r.deferred.len());
        }
    })
}

pub async fn promote(session: &Session, id: &str, from: &str, to: &str) -> CmdResult {
    let (from, to): (Tier, Tier) = (from.parse()?, to.parse()?);
    let entry = session
        .manager
        .promote(&session.scope, id, from, to)
        .await?;
    session.emit(&entry, |e| println!("⬆️  {} is now {}", e.id, e.tier))
}

pub async fn evict(session: &Session, id: &str) -> CmdResult {
    session.manager.evict(&session.scope, id).await?;
    session.emit(&json!({ "evicted": id }), |_| println!("🗑️  Evicted {id}"))
}

pub async fn stats(session: &Session) -> CmdResult {
    let stats = session.manager.stats(&session.scope).await?;

    session.emit(&stats, |s| {
        println!("🧠 Memory for scope {}", session.scope);
        println!("====================");
        println!("  Short-term:  {}", s.short_term);
        println!("  Long-term:   {}", s.long_term);
        println!("  Summaries:   {} ({} superseded)", s.summaries, s.superseded_summaries);
        println!("  Tombstones:  {}", s.tombstones);
    })
}
