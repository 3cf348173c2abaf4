// Inspect a snapshot database

use anyhow::{Context, Result};
use colored::*;
use relaynet_core::{EntityId, NetworkStorageSnapshot, SnapshotStore};
use std::path::Path;

fn open(path: &Path) -> Result<SnapshotStore> {
    if !path.exists() {
        anyhow::bail!("No snapshot database at {}", path.display());
    }
    SnapshotStore::open(path)
        .with_context(|| format!("Failed to open snapshot database {}", path.display()))
}

pub fn list(path: &Path) -> Result<()> {
    let store = open(path)?;
    let snapshots = store.load_all().context("Failed to read snapshots")?;

    println!("{} {}", "Snapshots in".bold(), path.display());
    println!();
    if snapshots.is_empty() {
        println!("  {}", "(none saved)".dimmed());
        return Ok(());
    }
    for snapshot in &snapshots {
        println!(
            "  primary {:<8} {:>4} contacts {:>4} messages",
            snapshot.primary_node_id.to_string().bright_cyan(),
            snapshot.last_seen.len(),
            snapshot.messages.len()
        );
    }
    Ok(())
}

pub fn show(path: &Path, primary: EntityId, json: bool) -> Result<()> {
    let store = open(path)?;
    let snapshot = store
        .get(primary)
        .context("Failed to read snapshot")?
        .with_context(|| format!("No snapshot for primary node {}", primary))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snapshot: &NetworkStorageSnapshot) {
    println!("{} {}", "Storage of node".bold(), snapshot.primary_node_id);
    println!();

    println!("{}", "Contacts:".bold());
    if snapshot.last_seen.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for contact in &snapshot.last_seen {
        println!(
            "  {:<8} seen {}  at {}",
            contact.entity_id.to_string().bright_cyan(),
            contact.last_seen_at,
            contact.position
        );
    }

    println!();
    println!("{}", "Messages:".bold());
    if snapshot.messages.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for message in &snapshot.messages {
        println!(
            "  {} -> {}  {}/{}: {}",
            message.created_at,
            message.dest_block_id.to_string().bright_cyan(),
            message.source_grid_name,
            message.source_block_name,
            message.content
        );
    }
}
