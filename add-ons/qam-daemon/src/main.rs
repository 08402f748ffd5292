//! QAM engine daemon.
//!
//! Long-running host for the deployment supervisor: loads configuration and
//! the template catalog, starts the monitoring loops, and logs a periodic
//! engine status heartbeat until shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qam_core::{
    BackendSelector, NotificationSink, NotifyError, QamConfig, QamStore, Severity, Template,
    TemplateRegistry, TracingMetricSink,
};
use qam_policy::{DenyListScreener, InMemoryLicenseDirectory, PolicyGate, RuleSnapshot};
use qam_supervisor::{start_monitoring, DeploymentSupervisor};

/// Heartbeat cadence for the status log line.
const STATUS_INTERVAL_SECS: u64 = 30;

/// Notification sink that logs alerts; replace with a real channel adapter in
/// deployments that have one.
struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(
        &self,
        channel: &str,
        severity: Severity,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        tracing::warn!(
            target: "qam::alerts",
            channel,
            severity = severity.as_str(),
            subject,
            body,
            "ALERT"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls).
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[qam-daemon] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("QAM_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match QamConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Configuration rejected at ingress");
            std::process::exit(1);
        }
    };

    let store = match QamStore::open(&config.storage_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, path = %config.storage_path, "Store open failed");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(TemplateRegistry::new());
    let templates_dir =
        std::env::var("QAM_TEMPLATES_DIR").unwrap_or_else(|_| "config/templates".into());
    load_templates(&registry, Path::new(&templates_dir));

    let rules = match std::env::var("QAM_RULES_PATH") {
        Ok(path) => match load_rules(Path::new(&path)) {
            Some(snapshot) => snapshot,
            None => {
                tracing::error!(path, "Rule snapshot unreadable; refusing to start permissive");
                std::process::exit(1);
            }
        },
        Err(_) => RuleSnapshot::builtin_default(),
    };
    tracing::info!(fingerprint = rules.fingerprint(), "Export-control rules loaded");

    let blocked: Vec<String> = std::env::var("QAM_DENYLIST")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();
    let gate = Arc::new(PolicyGate::new(
        config.policy.classification_ttl_days,
        rules,
        Arc::new(DenyListScreener::new(blocked, vec![], vec![])),
        Arc::new(InMemoryLicenseDirectory::new()),
    ));

    // Backend drivers register through the embedding integration; an empty
    // selector still serves catalog, policy, and compliance traffic.
    let selector = Arc::new(BackendSelector::new(Vec::new()));

    let supervisor = Arc::new(DeploymentSupervisor::new(
        config.clone(),
        registry.clone(),
        gate,
        selector,
        Arc::new(LogNotificationSink),
        Arc::new(TracingMetricSink),
        store,
    ));

    let monitoring = start_monitoring(supervisor.clone(), &config);
    tracing::info!(
        app = %config.app_name,
        templates = registry.len(),
        "QAM daemon started"
    );

    let mut status_tick = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                let status = supervisor.status();
                tracing::info!(
                    deployments = ?status.deployments_by_state,
                    pending_approvals = status.pending_approvals,
                    qmins_in_use = status.reservation_quantum_minutes_in_use,
                    learners = status.learner_count,
                    "engine status"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down daemon");
                break;
            }
        }
    }

    monitoring.stop().await;
}

/// Publish every `*.json` template definition under `dir`.
fn load_templates(registry: &TemplateRegistry, dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::warn!(path = %dir.display(), "No template directory; catalog starts empty");
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Template>(&s).map_err(|e| e.to_string()))
        {
            Ok(template) => {
                if let Err(e) = registry.publish(template) {
                    tracing::warn!(path = %path.display(), error = %e, "Template rejected");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Template unreadable");
            }
        }
    }
}

fn load_rules(path: &Path) -> Option<RuleSnapshot> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<RuleSnapshot>(&raw)
        .ok()
        .map(RuleSnapshot::rehydrated)
}
