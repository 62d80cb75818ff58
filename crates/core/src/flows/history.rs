//! Hash-chained audit trail of stage changes.
//!
//! Each entry's hash covers its own material plus the previous entry's hash,
//! so editing, reordering or dropping any entry breaks verification of every
//! entry after it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::workflow::{HistoryEntry, RequestId, StageCode, WorkflowAction};

/// Fields of an entry that are chosen by the engine; sequence and hashes are derived.
#[derive(Clone, Debug)]
pub struct EntryDraft {
    pub from_stage: Option<StageCode>,
    pub to_stage: StageCode,
    pub action: Option<WorkflowAction>,
    pub actor_id: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryVerification {
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Builds the entry that follows `history`.
pub fn next_entry(
    request_id: &RequestId,
    history: &[HistoryEntry],
    draft: EntryDraft,
) -> HistoryEntry {
    let sequence = u32::try_from(history.len()).unwrap_or(u32::MAX).saturating_add(1);
    let prev_hash = history.last().map(|entry| entry.entry_hash.clone());
    let entry_hash = hash_entry_material(
        request_id,
        sequence,
        draft.from_stage,
        draft.to_stage,
        draft.action,
        &draft.actor_id,
        draft.at,
        draft.note.as_deref(),
        prev_hash.as_deref(),
    );

    HistoryEntry {
        sequence,
        from_stage: draft.from_stage,
        to_stage: draft.to_stage,
        action: draft.action,
        actor_id: draft.actor_id,
        at: draft.at,
        note: draft.note,
        prev_hash,
        entry_hash,
    }
}

pub fn verify_history(request_id: &RequestId, history: &[HistoryEntry]) -> HistoryVerification {
    if history.is_empty() {
        return HistoryVerification {
            valid: false,
            verified_entries: 0,
            latest_hash: None,
            failure_reason: Some("history is empty".to_string()),
        };
    }

    let mut previous: Option<&HistoryEntry> = None;
    for (index, entry) in history.iter().enumerate() {
        let latest_hash = previous.map(|entry| entry.entry_hash.clone());
        let fail = |reason: String| HistoryVerification {
            valid: false,
            verified_entries: index,
            latest_hash: latest_hash.clone(),
            failure_reason: Some(reason),
        };

        let expected_sequence = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
        if entry.sequence != expected_sequence {
            return fail(format!(
                "sequence mismatch: expected {expected_sequence}, found {}",
                entry.sequence
            ));
        }
        if entry.prev_hash != latest_hash {
            return fail(format!("previous hash mismatch at entry {}", entry.sequence));
        }
        let expected_from = previous.map(|prior| prior.to_stage);
        if entry.from_stage != expected_from {
            return fail(format!("stage continuity broken at entry {}", entry.sequence));
        }

        let computed = hash_entry_material(
            request_id,
            entry.sequence,
            entry.from_stage,
            entry.to_stage,
            entry.action,
            &entry.actor_id,
            entry.at,
            entry.note.as_deref(),
            entry.prev_hash.as_deref(),
        );
        if computed != entry.entry_hash {
            return fail(format!("entry hash mismatch at entry {}", entry.sequence));
        }
        previous = Some(entry);
    }

    HistoryVerification {
        valid: true,
        verified_entries: history.len(),
        latest_hash: previous.map(|entry| entry.entry_hash.clone()),
        failure_reason: None,
    }
}

#[allow(clippy::too_many_arguments)]
fn hash_entry_material(
    request_id: &RequestId,
    sequence: u32,
    from_stage: Option<StageCode>,
    to_stage: StageCode,
    action: Option<WorkflowAction>,
    actor_id: &str,
    at: DateTime<Utc>,
    note: Option<&str>,
    prev_hash: Option<&str>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        request_id.0,
        sequence,
        from_stage.map(|stage| stage.as_str()).unwrap_or(""),
        to_stage.as_str(),
        action.map(|action| action.as_str()).unwrap_or(""),
        actor_id,
        at.to_rfc3339_opts(SecondsFormat::Micros, true),
        note.unwrap_or(""),
        prev_hash.unwrap_or(""),
    );
    sha256_hex(material.as_bytes())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
