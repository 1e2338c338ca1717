use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use flow_studio_client::{
    Backends, ConsoleEntry, FlowPersistence, FlowSession, FlowStudioError, LogLevel, TestPhase,
};
use flow_studio_core::validate::{SaveRules, validate_flow_for_save};
use flow_studio_core::{Flow, FlowId, PublishTracker, publish_status};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Turn a client error into the short message shown to people; the detail stays in the log.
pub fn user_facing(err: FlowStudioError) -> anyhow::Error {
    debug!(event = "cli.error", domain = "cli", error = %err);
    anyhow!(err.user_message())
}

pub fn load_flow(path: &Path) -> Result<Flow> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a valid flow document", path.display()))
}

pub fn parse_input(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--input is not valid JSON")?;
    if !value.is_object() {
        bail!("--input must be a JSON object");
    }
    Ok(value)
}

pub fn validate(path: &Path, allow_orphans: bool, out: &mut impl Write) -> Result<()> {
    let flow = load_flow(path)?;
    let rules = if allow_orphans {
        SaveRules::allow_orphans()
    } else {
        SaveRules::default()
    };
    let nodes = flow.definition.nodes().len();
    let edges = flow.definition.edges().len();
    match validate_flow_for_save(&flow, rules) {
        Ok(()) => {
            writeln!(out, "✓ flow is valid ({nodes} nodes, {edges} edges)")?;
            Ok(())
        }
        Err(err) => {
            match &err.node_id {
                Some(node) => writeln!(out, "✗ {} (node {node}): {}", err.kind, err.message)?,
                None => writeln!(out, "✗ {}: {}", err.kind, err.message)?,
            }
            Err(anyhow!("flow validation failed"))
        }
    }
}

/// Without `--published`, an active flow counts as published in its current state.
pub fn status(path: &Path, published: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let flow = load_flow(path)?;
    let status = match published {
        Some(snapshot) => {
            let snapshot = load_flow(snapshot)?;
            publish_status(&flow, Some(&snapshot.definition))
        }
        None => {
            let mut tracker = PublishTracker::new();
            tracker.on_loaded(&flow);
            tracker.status(&flow)
        }
    };
    writeln!(out, "{status}")?;
    Ok(())
}

pub async fn push(path: &Path, backends: Backends, out: &mut impl Write) -> Result<()> {
    let flow = load_flow(path)?;
    let mut session = FlowSession::from_flow(flow, backends);
    let outcome = session.save().await.map_err(user_facing)?;
    let verb = if outcome.is_created() { "created" } else { "updated" };
    let location = session.location().unwrap_or_default();
    writeln!(out, "{verb} {location}")?;
    Ok(())
}

pub async fn publish(id: &FlowId, backends: Backends, out: &mut impl Write) -> Result<()> {
    let mut session = FlowSession::open(id, backends)
        .await
        .map_err(user_facing)?;
    session.publish().await.map_err(user_facing)?;
    writeln!(out, "published /flows/{id} ({})", session.publish_status())?;
    Ok(())
}

pub fn confirm_delete(yes: bool) -> Result<()> {
    if !yes {
        bail!("deleting a flow cannot be undone; pass --yes to confirm");
    }
    Ok(())
}

pub async fn delete(id: &FlowId, backends: Backends, out: &mut impl Write) -> Result<()> {
    FlowPersistence::new(backends.api)
        .delete(id)
        .await
        .map_err(user_facing)?;
    writeln!(out, "deleted /flows/{id}")?;
    Ok(())
}

pub async fn rename(id: &FlowId, name: &str, backends: Backends, out: &mut impl Write) -> Result<()> {
    let renamed = FlowPersistence::new(backends.api)
        .rename(id, name)
        .await
        .map_err(user_facing)?;
    writeln!(out, "renamed /flows/{id} to \"{}\"", renamed.name)?;
    Ok(())
}

fn print_entry(entry: &ConsoleEntry, out: &mut impl Write) -> Result<()> {
    let level = match entry.level {
        LogLevel::Info => "info",
        LogLevel::Success => "ok",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    write!(
        out,
        "{} {level:>5} {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.message
    )?;
    if let Some(data) = &entry.data {
        write!(out, " {data}")?;
    }
    writeln!(out)?;
    Ok(())
}

/// Stream console entries until the run reaches a terminal phase.
pub async fn test(
    path: &Path,
    input: Option<Value>,
    backends: Backends,
    out: &mut impl Write,
) -> Result<()> {
    let flow = load_flow(path)?;
    let mut session = FlowSession::from_flow(flow, backends);
    let mut entries = session.console().subscribe();
    let handle = session.start_test(input).map_err(user_facing)?;
    let mut phases = handle.subscribe();
    let mut interrupted = false;

    loop {
        if phases.borrow_and_update().is_terminal() {
            break;
        }
        tokio::select! {
            entry = entries.recv() => match entry {
                Ok(entry) => print_entry(&entry, out)?,
                Err(RecvError::Lagged(skipped)) => writeln!(out, "({skipped} log entries skipped)")?,
                Err(RecvError::Closed) => break,
            },
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                info!(event = "cli.interrupt", domain = "cli");
                session.cancel_test();
            }
        }
    }
    while let Ok(entry) = entries.try_recv() {
        print_entry(&entry, out)?;
    }
    session.apply_run_updates();

    match handle.wait().await {
        TestPhase::Completed { result, .. } => {
            match result {
                Some(result) => writeln!(out, "completed: {result}")?,
                None => writeln!(out, "completed")?,
            }
            Ok(())
        }
        TestPhase::Cancelled { .. } | TestPhase::Terminated { .. } => {
            writeln!(out, "cancelled")?;
            Ok(())
        }
        TestPhase::Failed { message, .. } => Err(anyhow!("test run failed: {message}")),
        other => Err(anyhow!("test run stopped in phase {}", other.name())),
    }
}
