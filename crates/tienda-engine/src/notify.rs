//! # Notifier
//!
//! One toast slot per screen. A new toast replaces the current one and
//! cancels its dismiss timer; persistent toasts (the retry countdown) stay
//! until replaced or cleared.
//!
//! ```text
//!   show(t1) ──► slot = t1, timer₁ armed
//!   show(t2) ──► timer₁ aborted, slot = t2, timer₂ armed
//!   timer₂   ──► slot = None
//!   drop     ──► pending timer aborted
//! ```
//!
//! The UI watches the slot through [`Notifier::subscribe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tienda_core::Toast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default time a regular toast stays on screen.
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(4);

/// Cloneable handle to a screen's toast slot.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    slot: watch::Sender<Option<Toast>>,
    dismiss: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    duration: Duration,
}

impl NotifierInner {
    fn dismiss_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dismiss.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for NotifierInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dismiss_slot().take() {
            handle.abort();
        }
    }
}

impl Notifier {
    pub fn new(duration: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Notifier {
            inner: Arc::new(NotifierInner {
                slot,
                dismiss: Mutex::new(None),
                generation: AtomicU64::new(0),
                duration,
            }),
        }
    }

    /// Replaces the current toast.
    pub fn show(&self, toast: Toast) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let persistent = toast.persistent;
        debug!(severity = ?toast.severity, persistent, "Showing toast");

        let mut dismiss = self.inner.dismiss_slot();
        if let Some(handle) = dismiss.take() {
            handle.abort();
        }
        self.inner.slot.send_replace(Some(toast));

        if persistent {
            return;
        }
        // Outside a runtime the toast simply stays until replaced.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let weak = Arc::downgrade(&self.inner);
            let duration = self.inner.duration;
            *dismiss = Some(runtime.spawn(dismiss_after(weak, generation, duration)));
        }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.show(Toast::success(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(Toast::error(message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.show(Toast::info(message));
    }

    /// Toast currently on screen, if any.
    pub fn current(&self) -> Option<Toast> {
        self.inner.slot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Toast>> {
        self.inner.slot.subscribe()
    }

    /// Removes the current toast and cancels its timer.
    pub fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.inner.dismiss_slot().take() {
            handle.abort();
        }
        self.inner.slot.send_replace(None);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new(DEFAULT_TOAST_DURATION)
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("current", &self.current())
            .field("duration", &self.inner.duration)
            .finish()
    }
}

async fn dismiss_after(inner: Weak<NotifierInner>, generation: u64, duration: Duration) {
    tokio::time::sleep(duration).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    inner.slot.send_if_modified(|current| {
        if inner.generation.load(Ordering::SeqCst) == generation && current.is_some() {
            *current = None;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tienda_core::Severity;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_toast_auto_dismisses() {
        let notifier = Notifier::default();
        notifier.info("Sesión restaurada");
        assert_eq!(notifier.current().unwrap().severity, Severity::Info);

        sleep(Duration::from_secs(3)).await;
        assert!(notifier.current().is_some());

        sleep(Duration::from_secs(2)).await;
        assert!(notifier.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_toast_restarts_timer() {
        let notifier = Notifier::default();
        notifier.error("primero");
        sleep(Duration::from_secs(3)).await;
        notifier.success("segundo");

        sleep(Duration::from_secs(2)).await;
        assert_eq!(notifier.current().unwrap().message, "segundo");

        sleep(Duration::from_secs(3)).await;
        assert!(notifier.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_toast_stays() {
        let notifier = Notifier::default();
        notifier.show(Toast::error("Reintentando en 30s").persistent());
        sleep(Duration::from_secs(60)).await;
        assert!(notifier.current().is_some());

        notifier.clear();
        assert!(notifier.current().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        notifier.info("hola");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().message, "hola");
    }
}
