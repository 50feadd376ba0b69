//! Implementations behind the `netassure` subcommands.
//!
//! Each `run_*` function prints JSON to stdout (or a table for
//! `snapshots`) and leaves logging to stderr.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::lifecycle::Transition;
use crate::models::Snapshot;
use crate::session::Session;

/// Print the snapshot listing with symbolic aliases.
pub fn run_snapshots(session: &Session, loaded_only: bool) -> Result<()> {
    let registry = session.registry();
    println!(
        "{:<38} {:<10} {:<7} {:>8} {:<24} ALIASES",
        "ID", "STATUS", "LOCKED", "DEVICES", "NAME"
    );
    for snap in registry.iter() {
        if loaded_only && !snap.loaded() {
            continue;
        }
        let aliases = registry.aliases_of(snap.id()).join(",");
        println!(
            "{:<38} {:<10} {:<7} {:>8} {:<24} {}",
            snap.id(),
            snap.status,
            snap.locked,
            snap.total_dev_count,
            snap.name.as_deref().unwrap_or("-"),
            aliases
        );
    }
    Ok(())
}

pub fn run_resolve(session: &Session, reference: &str) -> Result<()> {
    let snap = session.resolve(reference)?;
    print_json(&snapshot_summary(session, snap))
}

/// Which lifecycle transition a CLI call asked for.
#[derive(Debug, Clone, Copy)]
pub enum LifecycleCommand {
    Load,
    Unload,
    Lock,
    Unlock,
}

pub fn run_lifecycle(session: &mut Session, command: LifecycleCommand, reference: &str) -> Result<()> {
    let transition = match command {
        LifecycleCommand::Load => session.load(reference),
        LifecycleCommand::Unload => session.unload(reference),
        LifecycleCommand::Lock => session.lock(reference),
        LifecycleCommand::Unlock => session.unlock(reference),
    }
    .with_context(|| format!("{:?} of '{}' failed", command, reference))?;

    let snap = session.resolve(reference)?;
    let mut out = snapshot_summary(session, snap);
    out["changed"] = json!(transition != Transition::Unchanged);
    out["pending"] = json!(transition == Transition::Submitted);
    print_json(&out)
}

pub fn run_download(
    session: &Session,
    reference: &str,
    out: Option<&Path>,
    retry: Option<u32>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let artifact = session
        .download(reference, out, retry, timeout_secs.map(Duration::from_secs))
        .with_context(|| format!("download of '{}' failed", reference))?;
    print_json(&serde_json::to_value(&artifact)?)
}

/// Show feature flags, or change the ones given. `Some(true)` means enabled.
pub fn run_flags(
    session: &mut Session,
    reference: &str,
    graph_cache: Option<bool>,
    historical_data: Option<bool>,
    intent_verification: Option<bool>,
) -> Result<()> {
    let current = session.settings(reference)?;
    let changed = if graph_cache.is_none() && historical_data.is_none() && intent_verification.is_none() {
        false
    } else {
        let transition = session.update_feature_flags(
            reference,
            graph_cache.map_or(current.graph_cache_disabled, |on| !on),
            historical_data.map_or(current.historical_data_disabled, |on| !on),
            intent_verification.map_or(current.intent_verification_disabled, |on| !on),
        )?;
        transition == Transition::Applied
    };

    let snap = session.resolve(reference)?;
    let flags = snap.feature_flags().unwrap_or(current);
    print_json(&json!({
        "snapshot": snap.id(),
        "changed": changed,
        "disabled": flags.disabled_actions(),
    }))
}

pub struct QueryArgs<'a> {
    pub endpoint: &'a str,
    pub columns: Option<&'a str>,
    pub filters: Option<&'a str>,
    pub sort: Option<&'a str>,
    pub snapshot: Option<&'a str>,
    pub unscoped: bool,
    pub count: bool,
}

pub fn run_query(session: &Session, args: QueryArgs<'_>) -> Result<()> {
    let mut query = if args.unscoped {
        session.unscoped(args.endpoint)
    } else {
        session.query(args.endpoint)
    };
    if let Some(cols) = args.columns {
        query = query.columns(cols.split(',').map(str::trim).filter(|c| !c.is_empty()));
    }
    if let Some(filters) = args.filters {
        query = query.filters(parse_json_arg("--filters", filters)?);
    }
    if let Some(sort) = args.sort {
        query = query.sort(parse_json_arg("--sort", sort)?);
    }
    if let Some(reference) = args.snapshot {
        query = query.snapshot(session.resolve(reference)?.id());
    }

    if args.count {
        let count = session.count(&query)?;
        return print_json(&json!({ "endpoint": query.endpoint, "count": count }));
    }
    let rows = session.fetch_all(&query)?;
    print_json(&Value::Array(rows))
}

pub fn run_columns(session: &Session, endpoint: &str) -> Result<()> {
    let columns = session.discover_columns(endpoint)?;
    print_json(&json!(columns))
}

fn parse_json_arg(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON: {}", flag, raw))
}

fn snapshot_summary(session: &Session, snap: &Snapshot) -> Value {
    json!({
        "id": snap.id(),
        "name": snap.name,
        "status": snap.status,
        "loaded": snap.loaded(),
        "locked": snap.locked,
        "aliases": session.registry().aliases_of(snap.id()),
        "active": session.active_id() == Some(snap.id()),
        "start": snap.started_at().map(|t| t.to_rfc3339()),
        "end": snap.ended_at().map(|t| t.to_rfc3339()),
        "devices": snap.total_dev_count,
        "sites": snap.sites,
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
