use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;

type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Armed {
    duration: Duration,
    callback: TimerCallback,
    handle: JoinHandle<()>,
}

/// A single re-armable one-shot timer.
///
/// Either idle or armed with exactly one pending callback. `start` while
/// armed cancels the previous firing; `restart` re-arms with the previously
/// supplied callback; `cancel` disarms idempotently. The callback itself runs
/// on a detached task, so a firing callback may safely call `restart` on the
/// timer that scheduled it.
#[derive(Default)]
pub struct ReusableTimer {
    armed: Mutex<Option<Armed>>,
}

impl ReusableTimer {
    pub fn new() -> Self {
        ReusableTimer {
            armed: Mutex::new(None),
        }
    }

    pub fn start<F, Fut>(&self, duration: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: TimerCallback = Arc::new(move || Box::pin(f()));
        let mut armed = self.armed.lock().unwrap();
        if let Some(previous) = armed.take() {
            previous.handle.abort();
        }
        *armed = Some(Armed {
            duration,
            handle: Self::arm(duration, callback.clone()),
            callback,
        });
    }

    /// Cancels a pending firing and re-arms with the last `(duration, callback)`
    /// pair. No-op while idle.
    pub fn restart(&self) {
        let mut armed = self.armed.lock().unwrap();
        if let Some(current) = armed.as_mut() {
            current.handle.abort();
            current.handle = Self::arm(current.duration, current.callback.clone());
        }
    }

    pub fn cancel(&self) {
        if let Some(armed) = self.armed.lock().unwrap().take() {
            armed.handle.abort();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.armed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|armed| !armed.handle.is_finished())
    }

    fn arm(duration: Duration, callback: TimerCallback) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // Detach so that aborting the armed task cannot kill a callback
            // that is already running.
            tokio::spawn(callback());
        })
    }
}
