// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C8 — handoff materializer: a pure projection of comms-journal rows and
//! unresolved claims into one canonical Markdown document, plus the atomic
//! write that persists it.
//!
//! Grounded on the teacher's `transcript.rs` for two things: the
//! deterministic-rendering idiom (build the whole document from immutable
//! inputs, no wall-clock reads inside the renderer itself) and the
//! read-existing-compare-before-write idempotency check `save_snapshot`
//! implies via its numbered-file scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::journal::{Channel, Claim, CommsRow, Direction, DeliveryStatus};

pub const MATERIALIZER_VERSION: &str = "1";
const MAX_UNRESOLVED_CLAIMS: usize = 10;
const MAX_TAGGED_SIGNALS: usize = 120;
const MAX_FAILED_DELIVERIES: usize = 80;
const MAX_PENDING_DELIVERIES: usize = 80;
const MAX_RECENT_MESSAGES: usize = 250;

const ANCHORED_TAGS: &[&str] = &[
    "DECISION", "TASK", "ACTION", "FINDING", "BLOCKER", "QUESTION", "NEXT", "DONE", "TEST", "PLAN", "RISK", "CLAIM",
];

/// Identifying metadata stamped into the document header; everything else
/// is derived from `rows`/`claims`.
#[derive(Debug, Clone)]
pub struct HandoffMeta {
    pub source: String,
    pub session_id: String,
}

/// Pure projection of comms-journal rows and unresolved claims into the
/// canonical Markdown document (spec §4.8; byte-equal given equal inputs).
pub fn materialize(rows: &[CommsRow], claims: &[Claim], now_ms: i64, meta: &HandoffMeta) -> String {
    let window_start = rows.iter().map(|r| r.ts_ms).min().unwrap_or(now_ms);
    let window_end = rows.iter().map(|r| r.ts_ms).max().unwrap_or(now_ms);

    let mut out = String::new();
    render_header(&mut out, rows.len(), window_start, window_end, now_ms, meta);
    render_coverage(&mut out, rows);
    render_unresolved_claims(&mut out, claims);
    render_tagged_signals(&mut out, rows);
    render_failed_deliveries(&mut out, rows);
    render_pending_deliveries(&mut out, rows);
    render_recent_messages(&mut out, rows);
    out
}

fn render_header(out: &mut String, row_count: usize, window_start: i64, window_end: i64, now_ms: i64, meta: &HandoffMeta) {
    out.push_str("# Session Handoff\n\n");
    out.push_str(&format!("- Generated at: {}\n", iso_ms(now_ms)));
    out.push_str(&format!("- Source: {}\n", meta.source));
    out.push_str(&format!("- Materializer version: {MATERIALIZER_VERSION}\n"));
    out.push_str(&format!("- Session id: {}\n", meta.session_id));
    out.push_str(&format!("- Rows: {row_count}\n"));
    out.push_str(&format!("- Window: {} – {}\n\n", iso_ms(window_start), iso_ms(window_end)));
}

fn render_coverage(out: &mut String, rows: &[CommsRow]) {
    let mut by_status: HashMap<&'static str, usize> = HashMap::new();
    let mut by_channel: HashMap<&'static str, usize> = HashMap::new();
    let mut by_direction: HashMap<&'static str, usize> = HashMap::new();

    for row in rows {
        *by_status.entry(status_label(row.status)).or_insert(0) += 1;
        *by_channel.entry(channel_label(row.channel)).or_insert(0) += 1;
        *by_direction.entry(direction_label(row.direction)).or_insert(0) += 1;
    }

    out.push_str("## Coverage\n\n");
    out.push_str(&format!("- By status: {}\n", render_counts(&by_status)));
    out.push_str(&format!("- By channel: {}\n", render_counts(&by_channel)));
    out.push_str(&format!("- By direction: {}\n\n", render_counts(&by_direction)));
}

fn render_counts(counts: &HashMap<&'static str, usize>) -> String {
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort_by_key(|(label, _)| **label);
    if entries.is_empty() {
        return "none".to_string();
    }
    entries.iter().map(|(label, count)| format!("{label}={count}")).collect::<Vec<_>>().join(", ")
}

fn render_unresolved_claims(out: &mut String, claims: &[Claim]) {
    out.push_str("## Unresolved Claims\n\n");

    let mut by_id: HashMap<&str, &Claim> = HashMap::new();
    for claim in claims {
        by_id
            .entry(claim.id.as_str())
            .and_modify(|existing| {
                if claim.confidence > existing.confidence {
                    *existing = claim;
                }
            })
            .or_insert(claim);
    }

    let mut deduped: Vec<&Claim> = by_id.into_values().collect();
    deduped.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    deduped.truncate(MAX_UNRESOLVED_CLAIMS);

    if deduped.is_empty() {
        out.push_str("_none_\n\n");
        return;
    }

    out.push_str("| Status | Confidence | Statement |\n|---|---|---|\n");
    for claim in deduped {
        out.push_str(&format!("| {} | {:.2} | {} |\n", claim_status_label(claim.status), claim.confidence, truncate_chars(&claim.statement, 100)));
    }
    out.push('\n');
}

fn render_tagged_signals(out: &mut String, rows: &[CommsRow]) {
    out.push_str("## Tagged Signals\n\n");
    let tagged: Vec<&CommsRow> = rows.iter().filter(|r| anchored_tag(&r.body).is_some()).collect();
    let tail = tail_of(&tagged, MAX_TAGGED_SIGNALS);

    if tail.is_empty() {
        out.push_str("_none_\n\n");
        return;
    }
    for row in tail {
        let tag = anchored_tag(&row.body).unwrap_or("");
        out.push_str(&format!("- `{}` [{}] {}\n", tag, iso_ms(row.ts_ms), row.body));
    }
    out.push('\n');
}

fn render_failed_deliveries(out: &mut String, rows: &[CommsRow]) {
    out.push_str("## Failed Deliveries\n\n");
    let failed: Vec<&CommsRow> = rows.iter().filter(|r| r.status == DeliveryStatus::Failed).collect();
    let tail = tail_of(&failed, MAX_FAILED_DELIVERIES);
    render_message_list(out, &tail);
}

fn render_pending_deliveries(out: &mut String, rows: &[CommsRow]) {
    out.push_str("## Pending Deliveries\n\n");
    let pending: Vec<&CommsRow> = rows.iter().filter(|r| is_pending_delivery(r)).collect();
    let tail = tail_of(&pending, MAX_PENDING_DELIVERIES);
    render_message_list(out, &tail);
}

fn render_recent_messages(out: &mut String, rows: &[CommsRow]) {
    out.push_str("## Recent Messages\n\n");
    let all: Vec<&CommsRow> = rows.iter().collect();
    let tail = tail_of(&all, MAX_RECENT_MESSAGES);
    render_message_list(out, &tail);
}

fn render_message_list(out: &mut String, rows: &[&CommsRow]) {
    if rows.is_empty() {
        out.push_str("_none_\n\n");
        return;
    }
    for row in rows {
        out.push_str(&format!("- [{}] {} ({}): {}\n", iso_ms(row.ts_ms), row.pane_id, row.role, row.body));
    }
    out.push('\n');
}

/// `is pending` per spec §4.8: outbound, not failed, and either status in
/// `{recorded, routed}` or brokered with an ack-status matching the listed
/// substrings.
fn is_pending_delivery(row: &CommsRow) -> bool {
    if row.direction != Direction::Outbound || row.status == DeliveryStatus::Failed {
        return false;
    }
    match row.status {
        DeliveryStatus::Recorded | DeliveryStatus::Routed => true,
        DeliveryStatus::Brokered => row
            .ack_status
            .as_deref()
            .map(|s| {
                let lower = s.to_lowercase();
                ["pending", "queue", "unverified", "accepted", "routed", "processing", "inflight"].iter().any(|needle| lower.contains(needle))
            })
            .unwrap_or(false),
        DeliveryStatus::Failed => false,
    }
}

fn tail_of<'a, T>(items: &'a [T], max: usize) -> Vec<T>
where
    T: Copy,
{
    let start = items.len().saturating_sub(max);
    items[start..].to_vec()
}

fn anchored_tag(body: &str) -> Option<&'static str> {
    for line in body.lines() {
        let stripped = strip_message_prefix(line);
        for tag in ANCHORED_TAGS {
            if stripped.starts_with(tag) {
                let rest = &stripped[tag.len()..];
                if rest.starts_with(':') || rest.starts_with(|c: char| c.is_whitespace()) {
                    return Some(tag);
                }
            }
        }
    }
    None
}

fn strip_message_prefix(line: &str) -> &str {
    let line = line.trim_start();
    if let Some(m) = agent_msg_prefix_regex().find(line) {
        return &line[m.end()..];
    }
    if let Some(m) = role_turn_prefix_regex().find(line) {
        return &line[m.end()..];
    }
    line
}

fn agent_msg_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[AGENT MSG[^\]]*\]\s*").unwrap_or_else(|e| unreachable!("static handoff prefix pattern must compile: {e}")))
}

fn role_turn_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\([A-Z]+\s*#\d+\):\s*").unwrap_or_else(|e| unreachable!("static handoff prefix pattern must compile: {e}")))
}

fn truncate_chars(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() { format!("{truncated}…") } else { truncated }
}

fn status_label(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Recorded => "recorded",
        DeliveryStatus::Routed => "routed",
        DeliveryStatus::Brokered => "brokered",
        DeliveryStatus::Failed => "failed",
    }
}

fn channel_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Pty => "pty",
        Channel::Broker => "broker",
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    }
}

fn claim_status_label(status: crate::journal::ClaimStatus) -> &'static str {
    match status {
        crate::journal::ClaimStatus::Contested => "contested",
        crate::journal::ClaimStatus::PendingProof => "pending_proof",
        crate::journal::ClaimStatus::Proposed => "proposed",
    }
}

/// Millisecond-since-epoch timestamp rendered as an ISO-8601 instant.
/// Avoids a wall-clock read — purely a formatting function of its input.
fn iso_ms(ms: i64) -> String {
    let secs = ms.div_euclid(1000);
    let millis = ms.rem_euclid(1000);
    match chrono::DateTime::from_timestamp(secs, (millis * 1_000_000) as u32) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => format!("{ms}ms-since-epoch"),
    }
}

/// Result of [`write_session_handoff`] (spec §4.8 "Atomic write rule").
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub written: bool,
    pub writes: Vec<PathBuf>,
}

/// Compute content, compare against the existing file, and write only on a
/// byte difference; mirrors to `legacy_path` when given and distinct, and
/// removes the named legacy per-pane files from each of `legacy_roots`.
pub fn write_session_handoff(
    path: &Path,
    content: &str,
    legacy_path: Option<&Path>,
    legacy_roots: &[PathBuf],
) -> std::io::Result<WriteOutcome> {
    let existing = std::fs::read(path).ok();
    if existing.as_deref() == Some(content.as_bytes()) {
        return Ok(WriteOutcome { written: false, writes: Vec::new() });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    let mut writes = vec![path.to_path_buf()];

    if let Some(legacy) = legacy_path {
        if legacy != path {
            if let Some(parent) = legacy.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(legacy, content)?;
            writes.push(legacy.to_path_buf());
        }
    }

    remove_legacy_pane_files(legacy_roots);
    Ok(WriteOutcome { written: true, writes })
}

const LEGACY_PANE_FILES: &[&str] = &["1.md", "2.md", "5.md"];

fn remove_legacy_pane_files(roots: &[PathBuf]) {
    for root in roots {
        for name in LEGACY_PANE_FILES {
            let _ = std::fs::remove_file(root.join(name));
        }
    }
}

#[cfg(test)]
#[path = "handoff_tests.rs"]
mod tests;
