//! The operator-facing operations. Exactly one runs per process.
//!
//! Key operations take an `open` callback instead of a store so that input
//! validation always finishes before the pinned map is touched.

use std::io::Write;

use anyhow::{Context, Result};
use serde_json::{Map as JsonMap, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use seg6_pot_common::SidKey;

use crate::{
    attach::AyaHookBackend,
    config::Seg6Config,
    error::Seg6Error,
    hooks::{HookManager, TcOrdering},
    key_store::{KeyEntry, KeyStore},
    loader::Seg6Module,
    validation::{format_secret, format_sid, parse_secret, parse_sid},
};

/// Column gap used by the table printer.
const TABLE_PADDING: usize = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListFormat {
    Table,
    Json,
}

/// Load the object, attach ingress then egress on `iface`, and block until
/// `shutdown` fires. The module is unloaded when this returns, on every
/// path; the pinned key map is left in place.
pub async fn install(cfg: &Seg6Config, iface: &str, shutdown: CancellationToken) -> Result<()> {
    let module = Seg6Module::load_embedded(cfg).context("failed to load eBPF object")?;
    let backend = AyaHookBackend::new(module, cfg);
    let ordering = TcOrdering {
        handle: cfg.tc_handle,
        priority: cfg.tc_priority,
    };
    let mut manager = HookManager::new(backend, iface, ordering);

    manager
        .bring_up()
        .with_context(|| format!("failed to attach programs on {iface}"))?;

    println!("Loaded XDP ingress and TC egress programs on {iface}. Press Ctrl+C to detach.");
    manager.serve(shutdown).await;
    println!("Detached from {iface}.");
    Ok(())
}

pub fn upsert<S, F>(open: F, sid_text: &str, key_hex: &str) -> Result<SidKey>
where
    S: KeyStore,
    F: FnOnce() -> Result<S, Seg6Error>,
{
    let sid = parse_sid(sid_text)?;
    let secret = parse_secret(key_hex)?;

    let mut store = open()?;
    store
        .upsert(sid, secret)
        .with_context(|| format!("failed to store key for SID {}", format_sid(&sid)))?;
    info!(sid = %format_sid(&sid), "key upserted");
    Ok(sid)
}

pub fn delete<S, F>(open: F, sid_text: &str) -> Result<SidKey>
where
    S: KeyStore,
    F: FnOnce() -> Result<S, Seg6Error>,
{
    let sid = parse_sid(sid_text)?;

    let mut store = open()?;
    store
        .delete(&sid)
        .with_context(|| format!("failed to remove SID {}", format_sid(&sid)))?;
    info!(sid = %format_sid(&sid), "key removed");
    Ok(sid)
}

pub fn get<S, F>(open: F, sid_text: &str) -> Result<KeyEntry>
where
    S: KeyStore,
    F: FnOnce() -> Result<S, Seg6Error>,
{
    let sid = parse_sid(sid_text)?;
    let store = open()?;
    let secret = store
        .get(&sid)
        .with_context(|| format!("failed to look up SID {}", format_sid(&sid)))?;
    Ok((sid, secret))
}

/// Print every entry to `out`. Nothing is written unless the whole scan
/// succeeds, so a fault never shows up as a short table.
pub fn list<S, F, W>(open: F, out: &mut W, format: ListFormat) -> Result<usize>
where
    S: KeyStore,
    F: FnOnce() -> Result<S, Seg6Error>,
    W: Write,
{
    let store = open()?;
    let entries = store
        .iter()
        .collect::<Result<Vec<KeyEntry>, _>>()
        .context("failed to list keys")?;

    match format {
        ListFormat::Table => write_table(out, &entries)?,
        ListFormat::Json => write_json(out, &entries)?,
    }
    Ok(entries.len())
}

pub fn write_entry<W: Write>(out: &mut W, entry: &KeyEntry) -> Result<()> {
    write_table(out, std::slice::from_ref(entry))
}

fn write_table<W: Write>(out: &mut W, entries: &[KeyEntry]) -> Result<()> {
    let rows: Vec<(String, String)> = entries
        .iter()
        .map(|(sid, secret)| (format_sid(sid), format_secret(secret)))
        .collect();
    let width = rows
        .iter()
        .map(|(sid, _)| sid.len())
        .chain(std::iter::once("SID".len()))
        .max()
        .unwrap_or(0)
        + TABLE_PADDING;

    writeln!(out, "{:<width$}KEY", "SID")?;
    for (sid, key) in &rows {
        writeln!(out, "{sid:<width$}{key}")?;
    }
    out.flush()?;
    Ok(())
}

fn write_json<W: Write>(out: &mut W, entries: &[KeyEntry]) -> Result<()> {
    let rows: Vec<Value> = entries
        .iter()
        .map(|(sid, secret)| {
            let mut obj = JsonMap::new();
            obj.insert("sid".to_string(), Value::String(format_sid(sid)));
            obj.insert("key".to_string(), Value::String(format_secret(secret)));
            Value::Object(obj)
        })
        .collect();
    serde_json::to_writer_pretty(&mut *out, &Value::Array(rows))?;
    writeln!(out)?;
    Ok(())
}
