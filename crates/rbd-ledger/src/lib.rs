//! rbd-ledger
//!
//! Append-only JSONL event ledger with an optional SHA-256 hash chain.
//!
//! The ledger records every cash event plus the run milestones
//! (`RUN_STARTED`, `FILL_RECORDED`, `RUN_COMPLETED`), giving the operator a
//! tamper-evident, replayable record of each tick.  Lines use the
//! workspace's canonical JSON form (shared with the config hash, see
//! `rbd-config`), so a recorded hash never depends on serialization
//! incidentals.  Event ids are derived deterministically (UUIDv5 over
//! chain head + sequence + canonical payload) — no RNG in the write path;
//! re-running the same tick against the same prior chain reproduces the
//! same ids.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rbd_config::{canonical_json, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Milestone event types; cash events use [`EVENT_CASH`].
pub const EVENT_RUN_STARTED: &str = "RUN_STARTED";
pub const EVENT_FILL_RECORDED: &str = "FILL_RECORDED";
pub const EVENT_RUN_COMPLETED: &str = "RUN_COMPLETED";
pub const EVENT_CASH: &str = "CASH_EVENT";
pub const EVENT_LIFECYCLE: &str = "LIFECYCLE_EVENT";

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only ledger writer.
///
/// Holds the file open for its lifetime; every [`append`][Self::append]
/// emits one canonical JSON line.  With `hash_chain` on, each event carries
/// `hash_prev`/`hash_self` links computed by [`chain_hash`].
pub struct LedgerWriter {
    file: File,
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Monotonically increasing sequence counter for event-id derivation.
    seq: u64,
}

impl LedgerWriter {
    /// Open (creating parent dirs and the file as needed) for appending.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open ledger {:?}", path))?;

        Ok(Self {
            file,
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open an existing ledger for appending, restoring the chain head and
    /// sequence counter from its tail.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut restored_seq = 0u64;
        let mut restored_hash: Option<String> = None;

        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("read ledger {:?}", path))?;
            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let ev: LedgerEvent = serde_json::from_str(line)
                    .with_context(|| format!("parse ledger line {}", restored_seq + 1))?;
                restored_hash = ev.hash_self;
                restored_seq += 1;
            }
        }

        let mut writer = Self::new(path, hash_chain)?;
        writer.seq = restored_seq;
        writer.last_hash = restored_hash;
        Ok(writer)
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Events appended so far (equals the next event's sequence number).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one event.
    pub fn append(
        &mut self,
        run_id: Uuid,
        ts_utc: DateTime<Utc>,
        event_type: &str,
        payload: Value,
    ) -> Result<LedgerEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq);
        self.seq += 1;

        let mut ev = LedgerEvent {
            event_id,
            run_id,
            ts_utc,
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.take();
            let linked = chain_hash(&ev)?;
            ev.hash_self = Some(linked.clone());
            self.last_hash = Some(linked);
        }

        let line = event_line(&ev)?;
        writeln!(self.file, "{line}")
            .with_context(|| format!("append to ledger {:?}", self.path))?;

        Ok(ev)
    }
}

/// Deterministic event id: UUIDv5 over (chain head, sequence, canonical
/// payload).
fn derive_event_id(last_hash: Option<&str>, payload: &Value, seq: u64) -> Uuid {
    let material = format!(
        "{}|{}|{}",
        last_hash.unwrap_or(""),
        seq,
        canonical_json(payload)
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes())
}

/// One event == one canonical JSON line.
fn event_line<T: Serialize>(value: &T) -> Result<String> {
    let tree = serde_json::to_value(value).context("serialize ledger event failed")?;
    Ok(canonical_json(&tree))
}

/// The view of an event the chain signs: everything except `hash_self`
/// (a hash cannot cover itself).
#[derive(Serialize)]
struct ChainedView<'a> {
    event_id: Uuid,
    run_id: Uuid,
    ts_utc: &'a DateTime<Utc>,
    event_type: &'a str,
    payload: &'a Value,
    hash_prev: Option<&'a str>,
}

/// Hash an event for chaining and verification.
pub fn chain_hash(ev: &LedgerEvent) -> Result<String> {
    let view = ChainedView {
        event_id: ev.event_id,
        run_id: ev.run_id,
        ts_utc: &ev.ts_utc,
        event_type: &ev.event_type,
        payload: &ev.payload,
        hash_prev: ev.hash_prev.as_deref(),
    };
    Ok(sha256_hex(event_line(&view)?.as_bytes()))
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The entire chain is valid.
    Valid { lines: usize },
    /// The chain is broken at the given line.
    Broken { line: usize, reason: String },
}

/// Verify the hash chain integrity of a ledger file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read ledger {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Verify the hash chain integrity of in-memory JSONL content.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut expected_prev: Option<String> = None;
    let mut seen = 0usize;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let line_no = idx + 1;

        let ev: LedgerEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse ledger event at line {line_no}"))?;
        seen += 1;

        if let Some(broken) = check_link(&ev, expected_prev.as_deref(), line_no)? {
            return Ok(broken);
        }
        expected_prev = ev.hash_self;
    }

    Ok(VerifyResult::Valid { lines: seen })
}

/// Check one event against the expected chain head; `Some` means broken.
fn check_link(
    ev: &LedgerEvent,
    expected_prev: Option<&str>,
    line: usize,
) -> Result<Option<VerifyResult>> {
    if ev.hash_prev.as_deref() != expected_prev {
        return Ok(Some(VerifyResult::Broken {
            line,
            reason: format!(
                "hash_prev mismatch: expected {:?}, got {:?}",
                expected_prev, ev.hash_prev
            ),
        }));
    }

    if let Some(claimed) = ev.hash_self.as_deref() {
        let recomputed = chain_hash(ev)?;
        if claimed != recomputed {
            return Ok(Some(VerifyResult::Broken {
                line,
                reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
            }));
        }
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap()
    }

    fn payload(kind: &str, amount: f64) -> Value {
        serde_json::json!({"kind": kind, "amount": amount})
    }

    #[test]
    fn append_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let mut w = LedgerWriter::new(&path, false).unwrap();

        w.append(Uuid::nil(), ts(), EVENT_RUN_STARTED, payload("start", 0.0))
            .unwrap();
        w.append(Uuid::nil(), ts(), EVENT_CASH, payload("BUY_DEBIT", -400.0))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(w.seq(), 2);
    }

    #[test]
    fn hash_chain_links_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let mut w = LedgerWriter::new(&path, true).unwrap();

        w.append(Uuid::nil(), ts(), EVENT_RUN_STARTED, payload("start", 0.0))
            .unwrap();
        w.append(Uuid::nil(), ts(), EVENT_CASH, payload("SELL_CREDIT", 120.0))
            .unwrap();
        w.append(Uuid::nil(), ts(), EVENT_RUN_COMPLETED, payload("done", 0.0))
            .unwrap();

        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 3 }
        );
    }

    #[test]
    fn tampering_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let mut w = LedgerWriter::new(&path, true).unwrap();

        w.append(Uuid::nil(), ts(), EVENT_CASH, payload("BUY_DEBIT", -400.0))
            .unwrap();
        w.append(Uuid::nil(), ts(), EVENT_CASH, payload("SELL_CREDIT", 120.0))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let tampered = content.replace("-400.0", "-40.0");
        match verify_hash_chain_str(&tampered).unwrap() {
            VerifyResult::Broken { line, .. } => assert_eq!(line, 1),
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn event_ids_are_deterministic() {
        let a = derive_event_id(Some("abc"), &payload("X", 1.0), 0);
        let b = derive_event_id(Some("abc"), &payload("X", 1.0), 0);
        let c = derive_event_id(Some("abc"), &payload("X", 1.0), 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn chain_hash_ignores_hash_self() {
        let mut ev = LedgerEvent {
            event_id: Uuid::nil(),
            run_id: Uuid::nil(),
            ts_utc: ts(),
            event_type: EVENT_CASH.to_string(),
            payload: payload("INFUSION", 500.0),
            hash_prev: None,
            hash_self: None,
        };
        let before = chain_hash(&ev).unwrap();
        ev.hash_self = Some("anything".to_string());
        assert_eq!(chain_hash(&ev).unwrap(), before);

        // But it does cover hash_prev.
        ev.hash_prev = Some("different-head".to_string());
        assert_ne!(chain_hash(&ev).unwrap(), before);
    }

    #[test]
    fn resume_restores_chain_head_and_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let last_hash = {
            let mut w = LedgerWriter::new(&path, true).unwrap();
            w.append(Uuid::nil(), ts(), EVENT_CASH, payload("INFUSION", 500.0))
                .unwrap();
            w.last_hash()
        };

        let mut resumed = LedgerWriter::resume(&path, true).unwrap();
        assert_eq!(resumed.seq(), 1);
        assert_eq!(resumed.last_hash(), last_hash);

        resumed
            .append(Uuid::nil(), ts(), EVENT_CASH, payload("BUY_DEBIT", -100.0))
            .unwrap();
        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 2 }
        );
    }

    #[test]
    fn event_lines_are_canonical() {
        let v = serde_json::json!({"b": 1, "a": {"z": 2, "y": 3}});
        assert_eq!(event_line(&v).unwrap(), r#"{"a":{"y":3,"z":2},"b":1}"#);
    }
}
