//! Execution runner.
//!
//! Drives a single execution through submit/poll/cancel against the ranked
//! backend chain. Each backend gets one attempt; a failure or timeout moves to
//! the next in the chain, and an exhausted chain fails the execution. Every
//! poll cycle honors the caller's deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use qam_core::{
    BackendDescriptor, BackendDriver, BackendError, CircuitSpec, PollStatus, RawResults,
    SubmitOptions,
};

/// Poll cadence while a submission is in flight.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What a successful run yields.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: RawResults,
    pub backend: BackendDescriptor,
    /// Wall-clock spent queued on the backend.
    pub queue_ms: u64,
    /// Wall-clock spent executing.
    pub execution_ms: u64,
    pub cost: f64,
    /// Backends tried before the one that succeeded.
    pub attempts: usize,
}

/// Run a circuit against the ranked backend chain.
pub async fn run_with_fallback(
    execution_id: &str,
    chain: &[Arc<dyn BackendDriver>],
    circuit: &CircuitSpec,
    shots: u64,
    opts: &SubmitOptions,
) -> Result<RunOutcome, SupervisorError> {
    if chain.is_empty() {
        return Err(SupervisorError::FallbackChainExhausted {
            execution_id: execution_id.to_string(),
            attempts: 0,
        });
    }

    let mut attempts = 0usize;
    for driver in chain {
        let descriptor = driver.describe();
        attempts += 1;
        match run_on_backend(execution_id, driver.as_ref(), &descriptor, circuit, shots, opts)
            .await
        {
            Ok(outcome) => {
                info!(
                    target: "qam::executor",
                    execution = execution_id,
                    backend = %descriptor.name,
                    attempts,
                    execution_ms = outcome.execution_ms,
                    "Execution completed"
                );
                return Ok(RunOutcome { attempts, ..outcome });
            }
            Err(e) => {
                warn!(
                    target: "qam::executor",
                    execution = execution_id,
                    backend = %descriptor.name,
                    error = %e,
                    "Backend attempt failed; walking fallback chain"
                );
            }
        }
    }

    Err(SupervisorError::FallbackChainExhausted {
        execution_id: execution_id.to_string(),
        attempts,
    })
}

async fn run_on_backend(
    execution_id: &str,
    driver: &dyn BackendDriver,
    descriptor: &BackendDescriptor,
    circuit: &CircuitSpec,
    shots: u64,
    opts: &SubmitOptions,
) -> Result<RunOutcome, SupervisorError> {
    let deadline = Instant::now() + Duration::from_millis(opts.deadline_ms);
    let submitted_at = Instant::now();

    let handle = driver.submit(circuit, shots, opts).await.map_err(|e| {
        map_backend_error(execution_id, &descriptor.name, e)
    })?;

    let mut started_at: Option<Instant> = None;
    loop {
        if Instant::now() >= deadline {
            let _ = driver.cancel(&handle).await;
            return Err(SupervisorError::BackendTimeout {
                execution_id: execution_id.to_string(),
                backend: descriptor.name.clone(),
            });
        }

        match driver.poll(&handle).await {
            Ok(PollStatus::Queued) => {
                debug!(target: "qam::executor", execution = execution_id, "queued");
            }
            Ok(PollStatus::Running) => {
                started_at.get_or_insert_with(Instant::now);
            }
            Ok(PollStatus::Done(results)) => {
                if results.total_shots() == 0 && results.per_shot_confidence.is_empty() {
                    return Err(SupervisorError::BackendMalformedResult {
                        execution_id: execution_id.to_string(),
                        backend: descriptor.name.clone(),
                        detail: "empty result set".into(),
                    });
                }
                let now = Instant::now();
                let started = started_at.unwrap_or(now);
                let queue_ms = started.duration_since(submitted_at).as_millis() as u64;
                let execution_ms = now.duration_since(started).as_millis() as u64;
                return Ok(RunOutcome {
                    results,
                    backend: descriptor.clone(),
                    queue_ms,
                    execution_ms,
                    cost: descriptor.cost_per_shot * shots as f64,
                    attempts: 0,
                });
            }
            Ok(PollStatus::Failed(detail)) => {
                return Err(SupervisorError::BackendMalformedResult {
                    execution_id: execution_id.to_string(),
                    backend: descriptor.name.clone(),
                    detail,
                });
            }
            Err(e) => {
                return Err(map_backend_error(execution_id, &descriptor.name, e));
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn map_backend_error(
    execution_id: &str,
    backend: &str,
    error: BackendError,
) -> SupervisorError {
    match error {
        BackendError::Unavailable(_) | BackendError::UnknownHandle(_) => {
            SupervisorError::BackendUnavailable {
                execution_id: execution_id.to_string(),
                backend: backend.to_string(),
            }
        }
        BackendError::Timeout(_) => SupervisorError::BackendTimeout {
            execution_id: execution_id.to_string(),
            backend: backend.to_string(),
        },
        BackendError::MalformedResult { detail, .. } => {
            SupervisorError::BackendMalformedResult {
                execution_id: execution_id.to_string(),
                backend: backend.to_string(),
                detail,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qam_core::{BackendKind, ExecutionHandle};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn descriptor(name: &str) -> BackendDescriptor {
        BackendDescriptor {
            name: name.to_string(),
            kind: BackendKind::Emulator,
            provider: "test".into(),
            region: "local".into(),
            availability: 1.0,
            cost_per_shot: 0.002,
            avg_queue_time_ms: 1,
            coherence_time_us: 100.0,
            gate_error_rate: 0.001,
        }
    }

    fn circuit() -> CircuitSpec {
        CircuitSpec {
            template_id: "qt-risk-v1".into(),
            algorithm: "amplitude-estimation".into(),
            qubits: 8,
            depth: 20,
            gate_count: 200,
            parameters: BTreeMap::new(),
        }
    }

    fn results() -> RawResults {
        let mut counts = BTreeMap::new();
        counts.insert("00".to_string(), 90u64);
        counts.insert("11".to_string(), 10u64);
        RawResults {
            counts,
            per_shot_confidence: vec![0.9; 100],
            metadata: Default::default(),
        }
    }

    /// Driver that needs `polls_until_done` polls, or always fails.
    struct ScriptedDriver {
        descriptor: BackendDescriptor,
        polls_until_done: u32,
        polls: AtomicU32,
        fail: bool,
    }

    impl ScriptedDriver {
        fn ok(name: &str, polls: u32) -> Self {
            Self {
                descriptor: descriptor(name),
                polls_until_done: polls,
                polls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                descriptor: descriptor(name),
                polls_until_done: 0,
                polls: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl BackendDriver for ScriptedDriver {
        async fn submit(
            &self,
            _circuit: &CircuitSpec,
            _shots: u64,
            _opts: &SubmitOptions,
        ) -> Result<ExecutionHandle, BackendError> {
            if self.fail {
                return Err(BackendError::Unavailable(self.descriptor.name.clone()));
            }
            Ok(ExecutionHandle {
                backend: self.descriptor.name.clone(),
                token: "t".into(),
            })
        }

        async fn poll(&self, _handle: &ExecutionHandle) -> Result<PollStatus, BackendError> {
            let n = self.polls.fetch_add(1, Ordering::Relaxed);
            if n >= self.polls_until_done {
                Ok(PollStatus::Done(results()))
            } else {
                Ok(PollStatus::Running)
            }
        }

        async fn cancel(&self, _handle: &ExecutionHandle) -> Result<(), BackendError> {
            Ok(())
        }

        fn describe(&self) -> BackendDescriptor {
            self.descriptor.clone()
        }
    }

    #[tokio::test]
    async fn first_backend_success() {
        let chain: Vec<Arc<dyn BackendDriver>> = vec![Arc::new(ScriptedDriver::ok("emu-1", 2))];
        let outcome = run_with_fallback(
            "exe-1",
            &chain,
            &circuit(),
            100,
            &SubmitOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.backend.name, "emu-1");
        assert_eq!(outcome.attempts, 1);
        assert!((outcome.cost - 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failure_walks_to_next_backend() {
        let chain: Vec<Arc<dyn BackendDriver>> = vec![
            Arc::new(ScriptedDriver::failing("down")),
            Arc::new(ScriptedDriver::ok("backup", 0)),
        ];
        let outcome = run_with_fallback(
            "exe-1",
            &chain,
            &circuit(),
            10,
            &SubmitOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.backend.name, "backup");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_chain_fails() {
        let chain: Vec<Arc<dyn BackendDriver>> = vec![
            Arc::new(ScriptedDriver::failing("a")),
            Arc::new(ScriptedDriver::failing("b")),
        ];
        let err = run_with_fallback(
            "exe-1",
            &chain,
            &circuit(),
            10,
            &SubmitOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::FallbackChainExhausted { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn empty_chain_fails_immediately() {
        let err = run_with_fallback("exe-1", &[], &circuit(), 10, &SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::FallbackChainExhausted { attempts: 0, .. }
        ));
    }

    #[tokio::test]
    async fn deadline_cancels_and_times_out() {
        // Never finishes within the 1ms deadline.
        let chain: Vec<Arc<dyn BackendDriver>> =
            vec![Arc::new(ScriptedDriver::ok("slow", u32::MAX))];
        let opts = SubmitOptions {
            deadline_ms: 1,
            ..Default::default()
        };
        let err = run_with_fallback("exe-1", &chain, &circuit(), 10, &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::FallbackChainExhausted { .. }
        ));
    }
}
