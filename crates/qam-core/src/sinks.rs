//! External sink contracts: receipt signer, metric sink, notification sink.
//!
//! The engine only ever talks to these traits; real transports live outside
//! the core. The metric buffer and the retrying notifier are the two pieces of
//! behavior the engine owns: bounded buffering with drop-oldest, and
//! exponential-backoff delivery.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::shared::Severity;

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Detached-signature contract for receipt content hashes.
pub trait Signer: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> Vec<u8>;
    fn verify(&self, bytes: &[u8], signature: &[u8]) -> bool;
}

// ---------------------------------------------------------------------------
// Metric sink
// ---------------------------------------------------------------------------

/// One metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub namespace: String,
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub ts_ms: i64,
}

/// Destination for metric points.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn write(&self, point: MetricPoint);
}

/// Bounded staging buffer in front of a [`MetricSink`]. On overflow the oldest
/// point is dropped and counted; the drop count is reported on flush.
pub struct MetricBuffer {
    capacity: usize,
    points: Mutex<VecDeque<MetricPoint>>,
    dropped: AtomicU64,
}

impl MetricBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock_points(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<MetricPoint>>, CoreError> {
        self.points
            .lock()
            .map_err(|e| CoreError::LockPoisoned(format!("metric buffer: {e}")))
    }

    pub fn push(&self, point: MetricPoint) -> Result<(), CoreError> {
        let mut points = self.lock_points()?;
        if points.len() >= self.capacity {
            points.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        points.push_back(point);
        Ok(())
    }

    /// Drain everything buffered into the sink. Returns (written, dropped so far).
    pub async fn flush(&self, sink: &dyn MetricSink) -> Result<(usize, u64), CoreError> {
        let drained: Vec<MetricPoint> = {
            let mut points = self.lock_points()?;
            points.drain(..).collect()
        };
        let written = drained.len();
        for point in drained {
            sink.write(point).await;
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(target: "qam::metrics", dropped, "Metric buffer dropped points");
        }
        Ok((written, dropped))
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> Result<usize, CoreError> {
        Ok(self.lock_points()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CoreError> {
        Ok(self.len()? == 0)
    }
}

/// Metric sink that emits points as trace logs; the default until a real
/// datastore adapter is wired in.
pub struct TracingMetricSink;

#[async_trait]
impl MetricSink for TracingMetricSink {
    async fn write(&self, point: MetricPoint) {
        debug!(
            target: "qam::metrics",
            namespace = %point.namespace,
            name = %point.name,
            value = point.value,
            "metric"
        );
    }
}

// ---------------------------------------------------------------------------
// Notification sink
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {channel} failed: {detail}")]
    DeliveryFailed { channel: String, detail: String },
}

/// Destination for alert notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(
        &self,
        channel: &str,
        severity: Severity,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// Retry policy for notification delivery.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry attempt (0-based): base · 2^attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Delivers a notification with exponential backoff, up to the configured cap.
pub async fn deliver_with_backoff(
    sink: &dyn NotificationSink,
    policy: &BackoffPolicy,
    channel: &str,
    severity: Severity,
    subject: &str,
    body: &str,
) -> Result<u32, NotifyError> {
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt - 1)).await;
        }
        match sink.deliver(channel, severity, subject, body).await {
            Ok(()) => return Ok(attempt + 1),
            Err(e) => {
                warn!(
                    target: "qam::alerts",
                    channel,
                    attempt = attempt + 1,
                    error = %e,
                    "Notification delivery failed"
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(NotifyError::DeliveryFailed {
        channel: channel.to_string(),
        detail: "no attempts configured".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn point(name: &str) -> MetricPoint {
        MetricPoint {
            namespace: "qam".into(),
            name: name.into(),
            value: 1.0,
            labels: BTreeMap::new(),
            ts_ms: 0,
        }
    }

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl MetricSink for CountingSink {
        async fn write(&self, _point: MetricPoint) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn buffer_drops_oldest_on_overflow() {
        let buffer = MetricBuffer::new(3);
        for i in 0..5 {
            buffer.push(point(&format!("m{i}"))).unwrap();
        }
        assert_eq!(buffer.len().unwrap(), 3);
        assert_eq!(buffer.dropped_count(), 2);

        let sink = CountingSink(AtomicUsize::new(0));
        let (written, dropped) = buffer.flush(&sink).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(dropped, 2);
        assert!(buffer.is_empty().unwrap());
    }

    struct FlakySink {
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn deliver(
            &self,
            channel: &str,
            _severity: Severity,
            _subject: &str,
            _body: &str,
        ) -> Result<(), NotifyError> {
            if self.fail_first.load(Ordering::Relaxed) > 0 {
                self.fail_first.fetch_sub(1, Ordering::Relaxed);
                return Err(NotifyError::DeliveryFailed {
                    channel: channel.to_string(),
                    detail: "transient".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_retries_with_backoff() {
        let sink = FlakySink {
            fail_first: AtomicUsize::new(2),
        };
        let policy = BackoffPolicy {
            base: Duration::from_millis(10),
            max_attempts: 5,
        };
        let attempts =
            deliver_with_backoff(&sink, &policy, "ops", Severity::High, "subject", "body")
                .await
                .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_gives_up_after_cap() {
        let sink = FlakySink {
            fail_first: AtomicUsize::new(100),
        };
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            max_attempts: 3,
        };
        let err = deliver_with_backoff(&sink, &policy, "ops", Severity::Low, "s", "b").await;
        assert!(err.is_err());
    }

    #[test]
    fn backoff_doubles() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(250),
            max_attempts: 4,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
    }
}
