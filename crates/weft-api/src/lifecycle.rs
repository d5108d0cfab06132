//! The start/stop state machine shared by every component.
//!
//! Components with a running state (transports, inbounds, outbounds,
//! choosers) are guarded by a [`Lifecycle`] rather than ad hoc flags: the
//! first `start` executes the start future and records its result, every
//! other `start` (concurrent or later) blocks until that execution finishes
//! and receives the same result without re-executing. `stop` is symmetric.
//! [`Lifecycle::wait_until_running`] is the one suspension point exposed to
//! callers of a component.

use std::time::Instant;

use tokio::sync::{Mutex, watch};

use crate::{Code, Status};

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// A start or stop function returned an error; terminal.
    Failed,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        }
    }
}

#[derive(Default)]
struct Gate {
    start_result: Option<Result<(), Status>>,
    stop_result: Option<Result<(), Status>>,
}

/// Idempotent start/stop guard.
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
    gate: Mutex<Gate>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            state,
            gate: Mutex::new(Gate::default()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Run the start function exactly once.
    ///
    /// Concurrent and later callers block until the first execution
    /// completes and receive the same result. Starting after a stop fails
    /// with `FailedPrecondition`.
    pub async fn start<F, Fut>(&self, f: F) -> Result<(), Status>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let mut gate = self.gate.lock().await;
        if gate.stop_result.is_some() {
            return Err(Status::failed_precondition("lifecycle already stopped"));
        }
        if let Some(result) = &gate.start_result {
            return result.clone();
        }
        self.state.send_replace(LifecycleState::Starting);
        let result = f().await;
        self.state.send_replace(match result {
            Ok(()) => LifecycleState::Running,
            Err(_) => LifecycleState::Failed,
        });
        gate.start_result = Some(result.clone());
        result
    }

    /// Run the stop function exactly once.
    ///
    /// Stopping before starting is a no-op that immediately succeeds and
    /// moves the state to `Stopped`. If the start function failed, the stop
    /// function is not executed.
    pub async fn stop<F, Fut>(&self, f: F) -> Result<(), Status>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let mut gate = self.gate.lock().await;
        if let Some(result) = &gate.stop_result {
            return result.clone();
        }
        match &gate.start_result {
            None | Some(Err(_)) => {
                self.state.send_replace(LifecycleState::Stopped);
                gate.stop_result = Some(Ok(()));
                return Ok(());
            }
            Some(Ok(())) => {}
        }
        self.state.send_replace(LifecycleState::Stopping);
        let result = f().await;
        self.state.send_replace(match result {
            Ok(()) => LifecycleState::Stopped,
            Err(_) => LifecycleState::Failed,
        });
        gate.stop_result = Some(result.clone());
        result
    }

    /// Block until the state reaches `Running`.
    ///
    /// Returns `DeadlineExceeded` if the deadline passes first, and a
    /// `FailedPrecondition`-class error if the component failed to start or
    /// has already stopped.
    pub async fn wait_until_running(&self, deadline: Option<Instant>) -> Result<(), Status> {
        let mut rx = self.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                LifecycleState::Running => return Ok(()),
                LifecycleState::Failed => {
                    return Err(Status::failed_precondition("component failed to start"));
                }
                LifecycleState::Stopping | LifecycleState::Stopped => {
                    return Err(Status::failed_precondition("component is stopped"));
                }
                LifecycleState::Idle | LifecycleState::Starting => {}
            }
            let changed = rx.changed();
            let waited = match deadline {
                None => changed.await,
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline.into(), changed).await {
                        Ok(waited) => waited,
                        Err(_) => {
                            return Err(Status::new(
                                Code::DeadlineExceeded,
                                "timed out waiting for component to start",
                            ));
                        }
                    }
                }
            };
            if waited.is_err() {
                return Err(Status::internal("lifecycle dropped while waiting"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn start_runs_exactly_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lifecycle = lifecycle.clone();
            let runs = runs.clone();
            tasks.push(tokio::spawn(async move {
                lifecycle
                    .start(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_running());
    }

    #[tokio::test]
    async fn stop_runs_exactly_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.start(|| async { Ok(()) }).await.unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let runs = runs.clone();
            lifecycle
                .stop(|| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let lifecycle = Lifecycle::new();
        lifecycle
            .stop(|| async { panic!("stop function must not run") })
            .await
            .unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);

        let err = lifecycle.start(|| async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn failed_start_is_sticky() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle
            .start(|| async { Err(Status::unavailable("no dice")) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(lifecycle.state(), LifecycleState::Failed);

        // Second start reports the same failure without re-running.
        let err = lifecycle
            .start(|| async { panic!("start function must not run again") })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn wait_until_running_honors_deadline() {
        let lifecycle = Lifecycle::new();
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = lifecycle
            .wait_until_running(Some(deadline))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn wait_until_running_wakes_on_start() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.wait_until_running(None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        lifecycle.start(|| async { Ok(()) }).await.unwrap();
        waiter.await.unwrap().unwrap();
    }
}
