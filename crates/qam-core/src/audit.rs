//! Receipt & audit log.
//!
//! Append-only, hash-chained record of state-changing events per subject.
//! `content_hash = SHA-256(prev_hash || canonical_json(body))` where the body
//! is the receipt with its hash and signature fields left out. A subject whose
//! chain fails verification is halted: no further appends are accepted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::CoreError;
use crate::shared::now_epoch_ms;
use crate::sinks::Signer;
use crate::store::QamStore;

/// Genesis predecessor for the first entry of every stream.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One receipt. Field order is the canonical serialization order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub subject_id: String,
    pub seq: u64,
    pub ts: i64,
    pub event: String,
    pub actor: String,
    pub details: serde_json::Value,
    pub prev_hash: String,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// The hashed portion of a receipt, in canonical field order.
#[derive(Serialize)]
struct ReceiptBody<'a> {
    subject_id: &'a str,
    seq: u64,
    ts: i64,
    event: &'a str,
    actor: &'a str,
    details: &'a serde_json::Value,
    prev_hash: &'a str,
}

fn chain_hash(prev_hash: &str, body_json: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(body_json);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[derive(Debug, Clone, Default)]
struct StreamHead {
    next_seq: u64,
    last_hash: String,
    halted: bool,
}

/// Append-only receipt log over all subjects.
pub struct AuditLog {
    store: Arc<QamStore>,
    heads: RwLock<HashMap<String, StreamHead>>,
    signer: Option<Arc<dyn Signer>>,
}

impl AuditLog {
    pub fn new(store: Arc<QamStore>) -> Self {
        Self {
            store,
            heads: RwLock::new(HashMap::new()),
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Append a receipt to the subject's stream. Returns the sealed entry.
    pub fn append(
        &self,
        subject_id: &str,
        actor: &str,
        event: &str,
        details: serde_json::Value,
    ) -> Result<AuditEntry, CoreError> {
        let mut heads = self.write_heads()?;
        let head = self.load_head(&mut heads, subject_id)?;
        if head.halted {
            return Err(CoreError::HashChainBroken {
                subject_id: subject_id.to_string(),
                seq: head.next_seq,
            });
        }

        let seq = head.next_seq;
        let ts = now_epoch_ms();
        let prev_hash = if seq == 0 {
            GENESIS_HASH.to_string()
        } else {
            head.last_hash.clone()
        };

        let body = ReceiptBody {
            subject_id,
            seq,
            ts,
            event,
            actor,
            details: &details,
            prev_hash: &prev_hash,
        };
        let body_json = serde_json::to_vec(&body)?;
        let content_hash = chain_hash(&prev_hash, &body_json);
        let signature = self
            .signer
            .as_ref()
            .map(|s| hex_encode(&s.sign(content_hash.as_bytes())));

        let entry = AuditEntry {
            subject_id: subject_id.to_string(),
            seq,
            ts,
            event: event.to_string(),
            actor: actor.to_string(),
            details,
            prev_hash,
            content_hash: content_hash.clone(),
            signature,
        };
        self.store.append_audit(subject_id, seq, &entry)?;

        head.next_seq = seq + 1;
        head.last_hash = content_hash;
        info!(
            target: "qam::audit",
            subject = subject_id,
            seq,
            event,
            "Receipt appended"
        );
        Ok(entry)
    }

    /// All receipts for a subject, in sequence order.
    pub fn entries(&self, subject_id: &str) -> Result<Vec<AuditEntry>, CoreError> {
        self.store.audit_stream(subject_id)
    }

    /// Verify the subject's full chain. On failure the stream is halted and
    /// `HashChainBroken` reported with the offending sequence number.
    pub fn verify(&self, subject_id: &str) -> Result<u64, CoreError> {
        let entries = self.entries(subject_id)?;
        let mut expected_prev = GENESIS_HASH.to_string();
        for entry in &entries {
            let body = ReceiptBody {
                subject_id: &entry.subject_id,
                seq: entry.seq,
                ts: entry.ts,
                event: &entry.event,
                actor: &entry.actor,
                details: &entry.details,
                prev_hash: &entry.prev_hash,
            };
            let body_json = serde_json::to_vec(&body)?;
            let recomputed = chain_hash(&entry.prev_hash, &body_json);
            if entry.prev_hash != expected_prev || recomputed != entry.content_hash {
                self.halt(subject_id, entry.seq)?;
                return Err(CoreError::HashChainBroken {
                    subject_id: subject_id.to_string(),
                    seq: entry.seq,
                });
            }
            if let (Some(signer), Some(sig)) = (&self.signer, &entry.signature) {
                let raw = hex_decode(sig);
                if !signer.verify(entry.content_hash.as_bytes(), &raw) {
                    self.halt(subject_id, entry.seq)?;
                    return Err(CoreError::HashChainBroken {
                        subject_id: subject_id.to_string(),
                        seq: entry.seq,
                    });
                }
            }
            expected_prev = entry.content_hash.clone();
        }
        Ok(entries.len() as u64)
    }

    /// True when the subject's stream has been halted by a failed verification.
    pub fn is_halted(&self, subject_id: &str) -> Result<bool, CoreError> {
        Ok(self
            .heads
            .read()
            .map_err(|e| CoreError::LockPoisoned(format!("audit heads: {e}")))?
            .get(subject_id)
            .map(|h| h.halted)
            .unwrap_or(false))
    }

    fn write_heads(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, StreamHead>>, CoreError> {
        self.heads
            .write()
            .map_err(|e| CoreError::LockPoisoned(format!("audit heads: {e}")))
    }

    fn halt(&self, subject_id: &str, seq: u64) -> Result<(), CoreError> {
        error!(
            target: "qam::audit",
            subject = subject_id,
            seq,
            "Hash chain broken; halting writes for subject"
        );
        let mut heads = self.write_heads()?;
        heads.entry(subject_id.to_string()).or_default().halted = true;
        Ok(())
    }

    fn load_head<'a>(
        &self,
        heads: &'a mut HashMap<String, StreamHead>,
        subject_id: &str,
    ) -> Result<&'a mut StreamHead, CoreError> {
        if !heads.contains_key(subject_id) {
            // Rebuild from storage on first touch (restart recovery).
            let entries: Vec<AuditEntry> = self.store.audit_stream(subject_id)?;
            let head = match entries.last() {
                Some(last) => StreamHead {
                    next_seq: last.seq + 1,
                    last_hash: last.content_hash.clone(),
                    halted: false,
                },
                None => StreamHead {
                    next_seq: 0,
                    last_hash: GENESIS_HASH.to_string(),
                    halted: false,
                },
            };
            heads.insert(subject_id.to_string(), head);
        }
        Ok(heads.get_mut(subject_id).expect("inserted above"))
    }
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
