//! Sled-backed persistence.
//!
//! Tree per concern: audit streams (`audit`), current entity snapshots
//! (`entities`), the reservation ledger (`ledger`), and learner snapshots
//! (`learners`). Values are JSON; audit keys are `{subject_id}\0{seq:020}` so
//! a prefix scan yields the stream in order.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::CoreError;
use crate::shared::now_epoch_ms;

const AUDIT_TREE: &str = "audit";
const ENTITY_TREE: &str = "entities";
const LEDGER_TREE: &str = "ledger";
const LEARNER_TREE: &str = "learners";

/// The engine's durable store.
pub struct QamStore {
    db: sled::Db,
}

impl QamStore {
    /// Open (or create) the store under `base_dir/qam_store`.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = base_dir.as_ref().join("qam_store");
        let db = sled::open(&path)?;
        info!(target: "qam::store", path = %path.display(), "Store opened");
        Ok(Self { db })
    }

    /// In-memory store for tests; nothing touches disk after drop.
    pub fn temporary() -> Result<Self, CoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, CoreError> {
        Ok(self.db.open_tree(name)?)
    }

    // -----------------------------------------------------------------------
    // Audit streams
    // -----------------------------------------------------------------------

    fn audit_key(subject_id: &str, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(subject_id.len() + 21);
        key.extend_from_slice(subject_id.as_bytes());
        key.push(0);
        key.extend_from_slice(format!("{seq:020}").as_bytes());
        key
    }

    pub fn append_audit<T: Serialize>(
        &self,
        subject_id: &str,
        seq: u64,
        entry: &T,
    ) -> Result<(), CoreError> {
        let tree = self.tree(AUDIT_TREE)?;
        let bytes = serde_json::to_vec(entry)?;
        tree.insert(Self::audit_key(subject_id, seq), bytes)?;
        Ok(())
    }

    /// The full stream for a subject, in sequence order.
    pub fn audit_stream<T: DeserializeOwned>(
        &self,
        subject_id: &str,
    ) -> Result<Vec<T>, CoreError> {
        let tree = self.tree(AUDIT_TREE)?;
        let mut prefix = subject_id.as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in tree.scan_prefix(&prefix) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Entity snapshots
    // -----------------------------------------------------------------------

    fn entity_key(kind: &str, id: &str) -> String {
        format!("{kind}/{id}")
    }

    pub fn put_entity<T: Serialize>(
        &self,
        kind: &str,
        id: &str,
        entity: &T,
    ) -> Result<(), CoreError> {
        let tree = self.tree(ENTITY_TREE)?;
        tree.insert(Self::entity_key(kind, id), serde_json::to_vec(entity)?)?;
        Ok(())
    }

    pub fn get_entity<T: DeserializeOwned>(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Option<T>, CoreError> {
        let tree = self.tree(ENTITY_TREE)?;
        match tree.get(Self::entity_key(kind, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Reservation ledger snapshot
    // -----------------------------------------------------------------------

    pub fn put_ledger<T: Serialize>(&self, snapshot: &T) -> Result<(), CoreError> {
        let tree = self.tree(LEDGER_TREE)?;
        tree.insert("current", serde_json::to_vec(snapshot)?)?;
        Ok(())
    }

    pub fn get_ledger<T: DeserializeOwned>(&self) -> Result<Option<T>, CoreError> {
        let tree = self.tree(LEDGER_TREE)?;
        match tree.get("current")? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Learner snapshots (with TTL)
    // -----------------------------------------------------------------------

    pub fn put_learner_snapshot(&self, key: &str, snapshot_json: &[u8]) -> Result<(), CoreError> {
        let tree = self.tree(LEARNER_TREE)?;
        let record = serde_json::json!({
            "saved_at_ms": now_epoch_ms(),
            "snapshot": serde_json::from_slice::<serde_json::Value>(snapshot_json)?,
        });
        tree.insert(key, serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Load a learner snapshot. Snapshots older than `ttl_ms` are discarded
    /// (removed and reported absent) so stale learners start fresh.
    pub fn get_learner_snapshot(
        &self,
        key: &str,
        ttl_ms: i64,
    ) -> Result<Option<Vec<u8>>, CoreError> {
        let tree = self.tree(LEARNER_TREE)?;
        let Some(bytes) = tree.get(key)? else {
            return Ok(None);
        };
        let record: serde_json::Value = serde_json::from_slice(&bytes)?;
        let saved_at = record["saved_at_ms"].as_i64().unwrap_or(0);
        if now_epoch_ms() - saved_at > ttl_ms {
            tree.remove(key)?;
            return Ok(None);
        }
        Ok(Some(serde_json::to_vec(&record["snapshot"])?))
    }

    pub fn flush(&self) -> Result<(), CoreError> {
        self.db.flush()?;
        Ok(())
    }
}
