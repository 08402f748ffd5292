//! Resource reservation ledger.
//!
//! Shared pools (quantum-minutes, classical CPU, memory, storage) mutated only
//! through the atomic `request`/`try_claim`/`release` API. Contending requests
//! are served FIFO by enqueue timestamp, ties broken by tenant priority class.
//! Reservations carry a subject id and are released on terminal deployment
//! states.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReservationConfig;
use crate::error::CoreError;
use crate::shared::{now_epoch_ms, PriorityClass};

/// Amounts across the four resource pools. Also used as a template's
/// resource estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceAmounts {
    pub quantum_minutes: f64,
    pub classical_cpu: f64,
    pub memory_gb: f64,
    pub storage_gb: f64,
}

impl ResourceAmounts {
    pub fn is_zero(&self) -> bool {
        self.quantum_minutes == 0.0
            && self.classical_cpu == 0.0
            && self.memory_gb == 0.0
            && self.storage_gb == 0.0
    }

    fn fits_within(&self, used: &ResourceAmounts, limits: &ResourceAmounts) -> bool {
        used.quantum_minutes + self.quantum_minutes <= limits.quantum_minutes
            && used.classical_cpu + self.classical_cpu <= limits.classical_cpu
            && used.memory_gb + self.memory_gb <= limits.memory_gb
            && used.storage_gb + self.storage_gb <= limits.storage_gb
    }

    fn add(&mut self, other: &ResourceAmounts) {
        self.quantum_minutes += other.quantum_minutes;
        self.classical_cpu += other.classical_cpu;
        self.memory_gb += other.memory_gb;
        self.storage_gb += other.storage_gb;
    }

    fn sub(&mut self, other: &ResourceAmounts) {
        self.quantum_minutes = (self.quantum_minutes - other.quantum_minutes).max(0.0);
        self.classical_cpu = (self.classical_cpu - other.classical_cpu).max(0.0);
        self.memory_gb = (self.memory_gb - other.memory_gb).max(0.0);
        self.storage_gb = (self.storage_gb - other.storage_gb).max(0.0);
    }
}

/// A granted hold on the pools, tied to a subject (deployment) id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub subject_id: String,
    pub amounts: ResourceAmounts,
    pub reserved: bool,
    pub reserved_at_ms: i64,
}

/// Result of a reservation request.
#[derive(Debug, Clone)]
pub enum ReservationOutcome {
    Granted(Reservation),
    /// Capacity is exhausted or an earlier request is still waiting; the
    /// caller retries `try_claim` until its deadline.
    Queued { position: usize },
}

#[derive(Debug, Clone)]
struct PendingRequest {
    subject_id: String,
    amounts: ResourceAmounts,
    priority: PriorityClass,
    enqueued_at_ms: i64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    in_use: ResourceAmounts,
    active: HashMap<String, Reservation>,
    queue: VecDeque<PendingRequest>,
}

/// The shared reservation ledger.
pub struct ReservationLedger {
    limits: ResourceAmounts,
    inner: RwLock<LedgerInner>,
}

impl ReservationLedger {
    pub fn new(config: &ReservationConfig) -> Self {
        Self {
            limits: ResourceAmounts {
                quantum_minutes: config.quantum_minutes,
                classical_cpu: config.classical_cpu,
                memory_gb: config.memory_gb,
                storage_gb: config.storage_gb,
            },
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    pub fn limits(&self) -> ResourceAmounts {
        self.limits
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerInner>, CoreError> {
        self.inner
            .read()
            .map_err(|e| CoreError::LockPoisoned(format!("reservation ledger: {e}")))
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerInner>, CoreError> {
        self.inner
            .write()
            .map_err(|e| CoreError::LockPoisoned(format!("reservation ledger: {e}")))
    }

    /// Request a hold. Grants immediately when the subject is first in line
    /// and the pools fit; otherwise enqueues (idempotently) and reports the
    /// queue position.
    pub fn request(
        &self,
        subject_id: &str,
        amounts: ResourceAmounts,
        priority: PriorityClass,
    ) -> Result<ReservationOutcome, CoreError> {
        self.check_within_limits(subject_id, &amounts)?;
        let mut inner = self.write_inner()?;

        if inner.active.contains_key(subject_id) {
            // Idempotent: already granted.
            let existing = inner.active[subject_id].clone();
            return Ok(ReservationOutcome::Granted(existing));
        }

        let already_queued = inner.queue.iter().any(|p| p.subject_id == subject_id);
        if !already_queued {
            inner.queue.push_back(PendingRequest {
                subject_id: subject_id.to_string(),
                amounts,
                priority,
                enqueued_at_ms: now_epoch_ms(),
            });
            Self::sort_queue(&mut inner.queue);
        }

        if let Some(reservation) = Self::grant_head_if_possible(&mut inner, &self.limits, subject_id)
        {
            return Ok(ReservationOutcome::Granted(reservation));
        }

        let position = inner
            .queue
            .iter()
            .position(|p| p.subject_id == subject_id)
            .unwrap_or(0);
        debug!(
            target: "qam::reservation",
            subject = subject_id,
            position,
            "Reservation queued"
        );
        Ok(ReservationOutcome::Queued { position })
    }

    /// Retry a queued request. Grants only when the subject heads the queue
    /// and the pools fit.
    pub fn try_claim(&self, subject_id: &str) -> Result<Option<Reservation>, CoreError> {
        let mut inner = self.write_inner()?;
        if let Some(existing) = inner.active.get(subject_id) {
            return Ok(Some(existing.clone()));
        }
        Ok(Self::grant_head_if_possible(
            &mut inner,
            &self.limits,
            subject_id,
        ))
    }

    /// Release the subject's hold. Idempotent. Returns true when a hold was
    /// actually freed.
    pub fn release(&self, subject_id: &str) -> Result<bool, CoreError> {
        let mut inner = self.write_inner()?;
        inner.queue.retain(|p| p.subject_id != subject_id);
        if let Some(reservation) = inner.active.remove(subject_id) {
            let amounts = reservation.amounts;
            inner.in_use.sub(&amounts);
            info!(
                target: "qam::reservation",
                subject = subject_id,
                qmins = amounts.quantum_minutes,
                "Reservation released"
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drop a queued (not yet granted) request, e.g. when its deployment fails.
    pub fn abandon(&self, subject_id: &str) -> Result<(), CoreError> {
        let mut inner = self.write_inner()?;
        inner.queue.retain(|p| p.subject_id != subject_id);
        Ok(())
    }

    /// Snapshot of the in-use totals.
    pub fn utilization(&self) -> Result<ResourceAmounts, CoreError> {
        Ok(self.read_inner()?.in_use)
    }

    /// Subject ids currently holding reservations.
    pub fn active_subjects(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.read_inner()?.active.keys().cloned().collect())
    }

    pub fn queued_len(&self) -> Result<usize, CoreError> {
        Ok(self.read_inner()?.queue.len())
    }

    fn check_within_limits(
        &self,
        subject_id: &str,
        amounts: &ResourceAmounts,
    ) -> Result<(), CoreError> {
        let exceeds = amounts.quantum_minutes > self.limits.quantum_minutes
            || amounts.classical_cpu > self.limits.classical_cpu
            || amounts.memory_gb > self.limits.memory_gb
            || amounts.storage_gb > self.limits.storage_gb;
        if exceeds {
            warn!(
                target: "qam::reservation",
                subject = subject_id,
                "Request exceeds hard pool limits"
            );
            return Err(CoreError::ResourceUnavailable {
                subject_id: subject_id.to_string(),
                detail: "requested amounts exceed configured pool limits".into(),
            });
        }
        Ok(())
    }

    /// FIFO by enqueue time; equal timestamps are won by the higher priority
    /// class.
    fn sort_queue(queue: &mut VecDeque<PendingRequest>) {
        let mut v: Vec<_> = queue.drain(..).collect();
        v.sort_by(|a, b| {
            a.enqueued_at_ms
                .cmp(&b.enqueued_at_ms)
                .then(b.priority.rank().cmp(&a.priority.rank()))
        });
        queue.extend(v);
    }

    fn grant_head_if_possible(
        inner: &mut LedgerInner,
        limits: &ResourceAmounts,
        subject_id: &str,
    ) -> Option<Reservation> {
        let head = inner.queue.front()?;
        if head.subject_id != subject_id {
            return None;
        }
        if !head.amounts.fits_within(&inner.in_use, limits) {
            return None;
        }
        let head = inner.queue.pop_front().expect("head checked above");
        let reservation = Reservation {
            subject_id: head.subject_id.clone(),
            amounts: head.amounts,
            reserved: true,
            reserved_at_ms: now_epoch_ms(),
        };
        inner.in_use.add(&head.amounts);
        inner
            .active
            .insert(head.subject_id.clone(), reservation.clone());
        info!(
            target: "qam::reservation",
            subject = %head.subject_id,
            qmins = head.amounts.quantum_minutes,
            "Reservation granted"
        );
        Some(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> ReservationLedger {
        ReservationLedger::new(&ReservationConfig {
            quantum_minutes: 10.0,
            classical_cpu: 8.0,
            memory_gb: 32.0,
            storage_gb: 100.0,
            retry_deadline_secs: 10,
        })
    }

    fn amounts(qmins: f64) -> ResourceAmounts {
        ResourceAmounts {
            quantum_minutes: qmins,
            classical_cpu: 1.0,
            memory_gb: 1.0,
            storage_gb: 1.0,
        }
    }

    #[test]
    fn grants_and_releases() {
        let ledger = ledger();
        let outcome = ledger
            .request("dep-a", amounts(4.0), PriorityClass::Standard)
            .unwrap();
        assert!(matches!(outcome, ReservationOutcome::Granted(_)));
        assert_eq!(ledger.utilization().unwrap().quantum_minutes, 4.0);
        assert!(ledger.release("dep-a").unwrap());
        assert_eq!(ledger.utilization().unwrap().quantum_minutes, 0.0);
        // Second release is a no-op.
        assert!(!ledger.release("dep-a").unwrap());
    }

    #[test]
    fn request_is_idempotent_while_held() {
        let ledger = ledger();
        ledger
            .request("dep-a", amounts(4.0), PriorityClass::Standard)
            .unwrap();
        let again = ledger
            .request("dep-a", amounts(4.0), PriorityClass::Standard)
            .unwrap();
        assert!(matches!(again, ReservationOutcome::Granted(_)));
        assert_eq!(ledger.utilization().unwrap().quantum_minutes, 4.0);
    }

    #[test]
    fn contention_is_fifo_and_conserves_pools() {
        let ledger = ledger();
        // Each wants 80% of the quantum-minute pool.
        let first = ledger
            .request("dep-1", amounts(8.0), PriorityClass::Standard)
            .unwrap();
        assert!(matches!(first, ReservationOutcome::Granted(_)));

        let second = ledger
            .request("dep-2", amounts(8.0), PriorityClass::Critical)
            .unwrap();
        assert!(matches!(second, ReservationOutcome::Queued { .. }));
        // Still blocked while the first holds.
        assert!(ledger.try_claim("dep-2").unwrap().is_none());
        assert!(ledger.utilization().unwrap().quantum_minutes <= 10.0);

        ledger.release("dep-1").unwrap();
        let claimed = ledger
            .try_claim("dep-2")
            .unwrap()
            .expect("should claim after release");
        assert_eq!(claimed.subject_id, "dep-2");
        assert_eq!(ledger.utilization().unwrap().quantum_minutes, 8.0);
    }

    #[test]
    fn oversized_request_is_rejected_outright() {
        let ledger = ledger();
        let err = ledger
            .request("dep-huge", amounts(11.0), PriorityClass::High)
            .unwrap_err();
        assert!(matches!(err, CoreError::ResourceUnavailable { .. }));
    }

    #[test]
    fn later_small_request_waits_behind_head() {
        // The head of the queue blocks later arrivals even if they would fit,
        // preserving FIFO fairness.
        let ledger = ledger();
        ledger
            .request("dep-1", amounts(8.0), PriorityClass::Standard)
            .unwrap();
        ledger
            .request("dep-2", amounts(8.0), PriorityClass::Standard)
            .unwrap();
        let third = ledger
            .request("dep-3", amounts(1.0), PriorityClass::Standard)
            .unwrap();
        assert!(matches!(third, ReservationOutcome::Queued { .. }));
        assert!(ledger.try_claim("dep-3").unwrap().is_none());
    }

    #[test]
    fn abandon_removes_queued_request() {
        let ledger = ledger();
        ledger
            .request("dep-1", amounts(8.0), PriorityClass::Standard)
            .unwrap();
        ledger
            .request("dep-2", amounts(8.0), PriorityClass::Standard)
            .unwrap();
        ledger.abandon("dep-2").unwrap();
        assert_eq!(ledger.queued_len().unwrap(), 0);
        ledger.release("dep-1").unwrap();
        assert!(ledger.try_claim("dep-2").unwrap().is_none());
    }
}
