//! Alert manager.
//!
//! Violation events queue here; the processing loop deduplicates against the
//! cooldown, correlates same-agreement alerts inside the correlation window
//! into one composite, escalates severity when the composite grows past the
//! configured count, and delivers through the notification sink with backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compliance::SlaError;
use crate::validator::Violation;
use qam_core::{
    deliver_with_backoff, prefixed_id, BackoffPolicy, EventBus, NotificationSink, QamEvent,
    Severity, SlaConfig,
};

/// A delivered (possibly composite) alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub agreement_id: String,
    pub severity: Severity,
    /// Metrics covered; more than one means a correlated composite.
    pub metrics: Vec<String>,
    pub correlated_count: usize,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct QueuedViolation {
    agreement_id: String,
    metric: String,
    severity: Severity,
    threshold: f64,
    actual: f64,
    queued_at: DateTime<Utc>,
}

/// Deduplicating, correlating alert pipeline.
pub struct AlertManager {
    cooldown: Duration,
    correlation_window: Duration,
    escalation_count: usize,
    pending: Mutex<Vec<QueuedViolation>>,
    /// (agreement, metric, severity) → last delivery time.
    last_fired: DashMap<(String, String, Severity), DateTime<Utc>>,
    suppressed: AtomicU64,
    sink: Arc<dyn NotificationSink>,
    backoff: BackoffPolicy,
    events: EventBus,
}

impl AlertManager {
    pub fn new(config: &SlaConfig, sink: Arc<dyn NotificationSink>, events: EventBus) -> Self {
        Self {
            cooldown: Duration::minutes(config.alert_cooldown_minutes as i64),
            correlation_window: Duration::seconds(config.correlation_window_seconds as i64),
            escalation_count: config.escalation_count,
            pending: Mutex::new(Vec::new()),
            last_fired: DashMap::new(),
            suppressed: AtomicU64::new(0),
            sink,
            backoff: BackoffPolicy::default(),
            events,
        }
    }

    fn lock_pending(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<QueuedViolation>>, SlaError> {
        self.pending
            .lock()
            .map_err(|e| SlaError::LockPoisoned(format!("alert queue: {e}")))
    }

    /// Queue a violation for the next processing pass.
    pub fn ingest(&self, violation: &Violation) -> Result<(), SlaError> {
        let mut pending = self.lock_pending()?;
        pending.push(QueuedViolation {
            agreement_id: violation.agreement_id.clone(),
            metric: violation.metric.clone(),
            severity: violation.severity,
            threshold: violation.threshold,
            actual: violation.actual,
            queued_at: violation.created_at,
        });
        Ok(())
    }

    pub fn pending_len(&self) -> Result<usize, SlaError> {
        Ok(self.lock_pending()?.len())
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// One processing pass: suppress, correlate, escalate, deliver.
    /// Idempotent and safe to run overlapping with ingestion.
    pub async fn process(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, SlaError> {
        let batch: Vec<QueuedViolation> = {
            let mut pending = self.lock_pending()?;
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // Suppression: identical (agreement, metric, severity) within cooldown.
        let mut fresh: Vec<QueuedViolation> = Vec::new();
        for item in batch {
            let key = (
                item.agreement_id.clone(),
                item.metric.clone(),
                item.severity,
            );
            let recently_fired = self
                .last_fired
                .get(&key)
                .map(|at| now - *at < self.cooldown)
                .unwrap_or(false);
            let duplicate_in_batch = fresh.iter().any(|f| {
                f.agreement_id == item.agreement_id
                    && f.metric == item.metric
                    && f.severity == item.severity
            });
            if recently_fired || duplicate_in_batch {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "qam::alerts",
                    agreement = %item.agreement_id,
                    metric = %item.metric,
                    "Alert suppressed inside cooldown"
                );
                continue;
            }
            fresh.push(item);
        }

        // Correlation: one composite per agreement over the window.
        let mut delivered = Vec::new();
        while let Some(seed) = fresh.first().cloned() {
            let (group, rest): (Vec<QueuedViolation>, Vec<QueuedViolation>) =
                fresh.drain(..).partition(|v| {
                    v.agreement_id == seed.agreement_id
                        && (v.queued_at - seed.queued_at).abs() <= self.correlation_window
                });
            fresh = rest;

            let mut severity = group
                .iter()
                .map(|v| v.severity)
                .max()
                .unwrap_or(seed.severity);
            if group.len() >= self.escalation_count {
                severity = severity.escalate();
            }
            let metrics: Vec<String> = group.iter().map(|v| v.metric.clone()).collect();
            let body = group
                .iter()
                .map(|v| {
                    format!(
                        "{}: actual {:.4} vs threshold {:.4}",
                        v.metric, v.actual, v.threshold
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");

            let alert = Alert {
                id: prefixed_id("alr"),
                agreement_id: seed.agreement_id.clone(),
                severity,
                metrics: metrics.clone(),
                correlated_count: group.len(),
                subject: format!(
                    "SLA violation on agreement {} ({} metric{})",
                    seed.agreement_id,
                    group.len(),
                    if group.len() == 1 { "" } else { "s" }
                ),
                body,
                created_at: now,
            };

            let delivery = deliver_with_backoff(
                self.sink.as_ref(),
                &self.backoff,
                "sla-alerts",
                alert.severity,
                &alert.subject,
                &alert.body,
            )
            .await;

            match delivery {
                Ok(attempts) => {
                    for v in &group {
                        self.last_fired.insert(
                            (v.agreement_id.clone(), v.metric.clone(), v.severity),
                            now,
                        );
                    }
                    self.events.publish(QamEvent::AlertDelivered {
                        alert_id: alert.id.clone(),
                        agreement_id: alert.agreement_id.clone(),
                        severity: alert.severity,
                        correlated_count: alert.correlated_count,
                    });
                    info!(
                        target: "qam::alerts",
                        alert = %alert.id,
                        agreement = %alert.agreement_id,
                        severity = alert.severity.as_str(),
                        correlated = alert.correlated_count,
                        attempts,
                        "Alert delivered"
                    );
                    delivered.push(alert);
                }
                Err(e) => {
                    // Delivery exhausted its retries; requeue for the next pass.
                    info!(
                        target: "qam::alerts",
                        agreement = %alert.agreement_id,
                        error = %e,
                        "Alert delivery failed; requeued"
                    );
                    self.lock_pending()?.extend(group);
                }
            }
        }
        Ok(delivered)
    }
}
