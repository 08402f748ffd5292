//! Monitoring loops.
//!
//! Three periodic tasks per engine instance (metric collection, compliance
//! validation, alert processing) plus the approval deadline scan at
//! `stage_timeout/4`. Each loop is cancellable through a shared watch channel,
//! idempotent, and safe to run overlapping with direct `*_once` calls (the
//! step methods on the supervisor are the single source of behavior).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::supervisor::DeploymentSupervisor;
use qam_core::QamConfig;

/// Handle over the spawned loops.
pub struct MonitoringHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl MonitoringHandle {
    /// Signal every loop to stop and wait for them to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!(target: "qam::monitoring", "Monitoring loops stopped");
    }
}

/// Spawn the monitoring loops for a supervisor.
pub fn start(supervisor: Arc<DeploymentSupervisor>, config: &QamConfig) -> MonitoringHandle {
    let (shutdown, _) = watch::channel(false);

    let handles = vec![
        spawn_loop(
            "metrics",
            config.engine.metric_interval(),
            shutdown.subscribe(),
            {
                let supervisor = supervisor.clone();
                move || {
                    let supervisor = supervisor.clone();
                    async move { supervisor.collect_metrics_once().await }
                }
            },
        ),
        spawn_loop(
            "compliance",
            config.engine.validation_interval(),
            shutdown.subscribe(),
            {
                let supervisor = supervisor.clone();
                move || {
                    let supervisor = supervisor.clone();
                    async move { supervisor.validate_compliance_once() }
                }
            },
        ),
        spawn_loop(
            "alerts",
            config.engine.alert_interval(),
            shutdown.subscribe(),
            {
                let supervisor = supervisor.clone();
                move || {
                    let supervisor = supervisor.clone();
                    async move { supervisor.process_alerts_once().await }
                }
            },
        ),
        spawn_loop(
            "approvals",
            config.approval.expiry_scan_interval(),
            shutdown.subscribe(),
            {
                let supervisor = supervisor.clone();
                move || {
                    let supervisor = supervisor.clone();
                    async move { supervisor.scan_approvals_once().await }
                }
            },
        ),
    ];

    info!(target: "qam::monitoring", loops = handles.len(), "Monitoring loops started");
    MonitoringHandle { shutdown, handles }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(target: "qam::monitoring", name, "tick");
                    step().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(target: "qam::monitoring", name, "shutdown");
                        break;
                    }
                }
            }
        }
    })
}
