//! # Retry Manager
//!
//! Runs one operation until it succeeds, fails for good, or the user gives
//! up. Between attempts a persistent toast counts down to the next automatic
//! try; the user can retry early.
//!
//! ## State Machine
//! ```text
//!                 start(op)
//!   ┌──────┐    ──────────►  ┌────────────┐   Ok    ┌──────┐
//!   │ Idle │                 │ Attempting │ ──────► │ Idle │  success toast
//!   └──────┘  ◄────────────  └────────────┘         └──────┘
//!      ▲      non-transient      │  ▲
//!      │      error toast        │  │ countdown hits 0
//!      │                 transient  │ or retry_now()
//!      │                   error │  │
//!      │                         ▼  │
//!      │   abandon()       ┌────────────────────┐
//!      └────────────────── │ Waiting{seconds}   │ ◄── tick every 1s
//!                          └────────────────────┘
//! ```
//!
//! - One cycle per manager: `start` while busy returns `RetryBusy`.
//! - The countdown is suspended while an attempt runs; `retry_now` and
//!   `abandon` sent during an attempt are drained when it settles, and an
//!   abandon is honoured only if the attempt failed.
//! - There is no attempt limit.
//!
//! The cycle runs on its own task so the screen stays usable meanwhile.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tienda_core::Toast;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;

/// Default pause between a failed attempt and the automatic retry.
pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(30);

const TICK: Duration = Duration::from_secs(1);

// =============================================================================
// Operation Value
// =============================================================================

type AttemptFn<T> = Arc<dyn Fn() -> BoxFuture<'static, EngineResult<T>> + Send + Sync>;

/// Everything needed to run an operation again, identically.
pub struct RetryableOperation<T> {
    /// Op id; also the idempotency key the store sees.
    pub id: String,
    attempt: AttemptFn<T>,
    /// Error of the attempt that already failed, if any.
    pub last_error: Option<String>,
    /// Toast shown when an attempt succeeds.
    pub success_message: String,
}

impl<T> RetryableOperation<T> {
    pub fn new<F, Fut>(id: impl Into<String>, success_message: impl Into<String>, attempt: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
    {
        RetryableOperation {
            id: id.into(),
            attempt: Arc::new(move || attempt().boxed()),
            last_error: None,
            success_message: success_message.into(),
        }
    }

    /// Starts the cycle in the waiting phase with this error on screen.
    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Runs one attempt.
    pub async fn attempt(&self) -> EngineResult<T> {
        (self.attempt)().await
    }
}

impl<T> Clone for RetryableOperation<T> {
    fn clone(&self) -> Self {
        RetryableOperation {
            id: self.id.clone(),
            attempt: Arc::clone(&self.attempt),
            last_error: self.last_error.clone(),
            success_message: self.success_message.clone(),
        }
    }
}

impl<T> fmt::Debug for RetryableOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableOperation")
            .field("id", &self.id)
            .field("last_error", &self.last_error)
            .finish()
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryStatus {
    #[default]
    Idle,
    Attempting {
        op_id: String,
        attempt: u32,
    },
    Waiting {
        op_id: String,
        seconds_left: u64,
        last_error: String,
    },
}

impl RetryStatus {
    pub fn is_waiting(&self) -> bool {
        matches!(self, RetryStatus::Waiting { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    RetryNow,
    Abandon,
}

enum Wake {
    Retry,
    Abandon,
}

// =============================================================================
// Manager
// =============================================================================

/// Per-screen retry manager. Clones share the same cycle.
#[derive(Clone)]
pub struct RetryManager {
    inner: Arc<Inner>,
}

struct Inner {
    status: watch::Sender<RetryStatus>,
    busy: AtomicBool,
    control: Mutex<Option<mpsc::Sender<Control>>>,
    notifier: Notifier,
    countdown: Duration,
}

impl Inner {
    fn control_slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<Control>>> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, message: Control) -> bool {
        match self.control_slot().as_ref() {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }
}

/// Returns the manager to idle however the cycle ends.
struct BusyGuard(Arc<Inner>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.control_slot().take();
        self.0.status.send_replace(RetryStatus::Idle);
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

impl RetryManager {
    pub fn new(notifier: Notifier, countdown: Duration) -> Self {
        let (status, _) = watch::channel(RetryStatus::Idle);
        RetryManager {
            inner: Arc::new(Inner {
                status,
                busy: AtomicBool::new(false),
                control: Mutex::new(None),
                notifier,
                countdown: countdown.max(TICK),
            }),
        }
    }

    pub fn status(&self) -> RetryStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RetryStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// Starts a cycle for `op` on a new task.
    ///
    /// ## Errors
    /// `RetryBusy` if a cycle is already running.
    pub fn start<T>(&self, op: RetryableOperation<T>) -> EngineResult<RetryCycle<T>>
    where
        T: Send + 'static,
    {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(op_id = %op.id, "Retry cycle already running, rejecting submission");
            return Err(EngineError::RetryBusy);
        }

        let (tx, rx) = mpsc::channel(8);
        *self.inner.control_slot() = Some(tx);

        let op_id = op.id.clone();
        let guard = BusyGuard(Arc::clone(&self.inner));
        let handle = tokio::spawn(run_cycle(guard, op, rx));
        Ok(RetryCycle { op_id, handle })
    }

    /// Skips the rest of the countdown. Only acts while waiting.
    pub fn retry_now(&self) -> bool {
        if !self.inner.status.borrow().is_waiting() {
            debug!("retry_now ignored, not waiting");
            return false;
        }
        self.inner.send(Control::RetryNow)
    }

    /// Ends the running cycle at the next opportunity.
    pub fn abandon(&self) -> bool {
        self.inner.send(Control::Abandon)
    }
}

impl fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryManager")
            .field("status", &self.status())
            .field("countdown", &self.inner.countdown)
            .finish()
    }
}

/// A running cycle.
pub struct RetryCycle<T> {
    op_id: String,
    handle: JoinHandle<EngineResult<T>>,
}

impl<T> RetryCycle<T> {
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the cycle to end.
    pub async fn join(self) -> EngineResult<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(op_id = %self.op_id, error = %e, "Retry task ended abnormally");
                Err(EngineError::Abandoned(self.op_id))
            }
        }
    }
}

impl<T> fmt::Debug for RetryCycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCycle")
            .field("op_id", &self.op_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// =============================================================================
// Cycle
// =============================================================================

async fn run_cycle<T>(
    guard: BusyGuard,
    op: RetryableOperation<T>,
    mut control: mpsc::Receiver<Control>,
) -> EngineResult<T> {
    let inner = Arc::clone(&guard.0);
    let mut pending_error = op.last_error.clone();
    let mut attempt = 0u32;

    loop {
        if let Some(message) = pending_error.take() {
            if let Wake::Abandon = wait(&inner, &op.id, &message, &mut control).await {
                info!(op_id = %op.id, "Retry cycle abandoned");
                inner.notifier.clear();
                return Err(EngineError::Abandoned(op.id.clone()));
            }
        }

        attempt += 1;
        inner.status.send_replace(RetryStatus::Attempting {
            op_id: op.id.clone(),
            attempt,
        });
        debug!(op_id = %op.id, attempt, "Attempting operation");

        let result = op.attempt().await;
        let abandoned = drain(&mut control);

        match result {
            Ok(value) => {
                info!(op_id = %op.id, attempt, "Operation succeeded");
                inner.notifier.success(op.success_message.clone());
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                error!(op_id = %op.id, attempt, error = %e, "Attempt failed, will retry");
                if abandoned {
                    info!(op_id = %op.id, "Retry cycle abandoned");
                    inner.notifier.clear();
                    return Err(EngineError::Abandoned(op.id.clone()));
                }
                pending_error = Some(e.user_message());
            }
            Err(e) => {
                error!(op_id = %op.id, attempt, error = %e, "Attempt failed permanently");
                inner.notifier.error(e.user_message());
                return Err(e);
            }
        }
    }
}

/// Countdown to the next attempt. Returns early on `retry_now`/`abandon`.
async fn wait(
    inner: &Inner,
    op_id: &str,
    last_error: &str,
    control: &mut mpsc::Receiver<Control>,
) -> Wake {
    let mut seconds_left = inner.countdown.as_secs().max(1);
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        inner.status.send_replace(RetryStatus::Waiting {
            op_id: op_id.to_string(),
            seconds_left,
            last_error: last_error.to_string(),
        });
        inner.notifier.show(
            Toast::error(format!(
                "{}\nReintentando en {}s",
                last_error, seconds_left
            ))
            .persistent(),
        );

        tokio::select! {
            _ = ticker.tick() => {
                seconds_left -= 1;
                if seconds_left == 0 {
                    return Wake::Retry;
                }
            }
            message = control.recv() => match message {
                Some(Control::RetryNow) => {
                    debug!(op_id, seconds_left, "Manual retry");
                    return Wake::Retry;
                }
                Some(Control::Abandon) | None => return Wake::Abandon,
            },
        }
    }
}

/// Empties messages that arrived during an attempt. True if one was an
/// abandon.
fn drain(control: &mut mpsc::Receiver<Control>) -> bool {
    let mut abandoned = false;
    while let Ok(message) = control.try_recv() {
        abandoned |= message == Control::Abandon;
    }
    abandoned
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tienda_core::{CoreError, Severity};
    use tokio::time::sleep;

    fn manager() -> (RetryManager, Notifier) {
        let notifier = Notifier::default();
        (RetryManager::new(notifier.clone(), DEFAULT_COUNTDOWN), notifier)
    }

    /// Fails with a transient error `failures` times, then returns the
    /// attempt number.
    fn flaky(failures: u32) -> (RetryableOperation<u32>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = RetryableOperation::new("sale_1_0_abcd1234", "Venta registrada", move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(EngineError::Unavailable("sin conexión".into()))
                } else {
                    Ok(n)
                }
            }
        });
        (op, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_succeeds() {
        let (manager, notifier) = manager();
        let (op, calls) = flaky(0);

        let result = manager.start(op).unwrap().join().await.unwrap();
        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), RetryStatus::Idle);
        assert!(!manager.is_busy());

        let toast = notifier.current().unwrap();
        assert_eq!(toast.severity, Severity::Success);
        assert_eq!(toast.message, "Venta registrada");
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_then_automatic_retry() {
        let (manager, notifier) = manager();
        let (op, calls) = flaky(1);
        let cycle = manager.start(op).unwrap();

        sleep(Duration::from_millis(29_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match manager.status() {
            RetryStatus::Waiting { seconds_left, last_error, .. } => {
                assert_eq!(seconds_left, 1);
                assert!(last_error.contains("sin conexión"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        let toast = notifier.current().unwrap();
        assert!(toast.persistent);
        assert!(toast.message.ends_with("Reintentando en 1s"));

        assert_eq!(cycle.join().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_now_skips_countdown() {
        let (manager, _) = manager();
        let (op, calls) = flaky(1);
        let started = Instant::now();
        let cycle = manager.start(op).unwrap();

        let mut status = manager.subscribe();
        status.wait_for(RetryStatus::is_waiting).await.unwrap();
        assert!(manager.retry_now());

        assert_eq!(cycle.join().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retry_now_ignored_when_idle() {
        let (manager, _) = manager();
        assert!(!manager.retry_now());
        assert!(!manager.abandon());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submission_rejected_while_busy() {
        let (manager, _) = manager();
        let (op, _) = flaky(1);
        let cycle = manager.start(op).unwrap();

        let (other, other_calls) = flaky(0);
        assert!(matches!(manager.start(other), Err(EngineError::RetryBusy)));
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);

        cycle.join().await.unwrap();
        assert!(!manager.is_busy());
        let (again, _) = flaky(0);
        assert!(manager.start(again).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_ends_cycle() {
        let (manager, notifier) = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op: RetryableOperation<()> = RetryableOperation::new("sale_1_0_x", "ok", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Core(CoreError::EmptyCart)) }
        });

        let err = manager.start(op).unwrap().join().await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::EmptyCart)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), RetryStatus::Idle);
        assert_eq!(notifier.current().unwrap().severity, Severity::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_while_waiting() {
        let (manager, notifier) = manager();
        let (op, calls) = flaky(5);
        let cycle = manager.start(op).unwrap();

        let mut status = manager.subscribe();
        status.wait_for(RetryStatus::is_waiting).await.unwrap();
        assert!(manager.abandon());

        let err = cycle.join().await.unwrap_err();
        assert!(matches!(err, EngineError::Abandoned(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(notifier.current().is_none());
        assert!(!manager.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_error_starts_in_countdown() {
        let (manager, notifier) = manager();
        let (op, calls) = flaky(0);
        let cycle = manager
            .start(op.with_last_error("Error: sin conexión"))
            .unwrap();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(notifier.current().unwrap().message.starts_with("Error: sin conexión"));

        assert_eq!(cycle.join().await.unwrap(), 1);
    }
}
