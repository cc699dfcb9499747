//! Background popup suppression
//!
//! A [`SuppressionSession`] runs a recurring dismissal timer on its own task
//! while the caller awaits an action. The action's result is handed back the
//! moment it settles. A pass already in flight at that point finishes on the
//! timer task; no pass starts after it. The timer also stops when
//! `max_duration` elapses, when its [`SuppressionHandle`] is cancelled, or
//! when the session is dropped.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::SuppressionOptions;
use crate::coordinator::PopupCoordinator;

#[derive(Debug)]
struct SessionState {
    started_at: Instant,
    token: CancellationToken,
    passes: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

/// Observes a session and cancels its background timer
#[derive(Debug, Clone)]
pub struct SuppressionHandle {
    state: Arc<SessionState>,
}

impl SuppressionHandle {
    pub fn cancel(&self) {
        self.state.token.cancel();
    }

    /// Whether the timer has been told to stop
    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// Background passes completed so far
    pub fn passes(&self) -> usize {
        self.state.passes.load(Ordering::SeqCst)
    }

    /// Display form of the wrapped action's failure, if it failed
    pub fn last_error(&self) -> Option<String> {
        self.state.last_error.lock().clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.state.started_at.elapsed()
    }
}

/// One suppressed action; consumed by [`SuppressionSession::run`]
pub struct SuppressionSession {
    state: Arc<SessionState>,
    check_interval: Duration,
    max_duration: Duration,
}

impl SuppressionSession {
    pub fn new(options: &SuppressionOptions) -> Self {
        Self {
            state: Arc::new(SessionState {
                started_at: Instant::now(),
                token: CancellationToken::new(),
                passes: AtomicUsize::new(0),
                last_error: Mutex::new(None),
            }),
            check_interval: options.check_interval(),
            max_duration: options.max_duration(),
        }
    }

    pub fn handle(&self) -> SuppressionHandle {
        SuppressionHandle {
            state: self.state.clone(),
        }
    }

    /// Run `action` while the timer dismisses overlays in the background.
    ///
    /// The action's output is returned unchanged, as soon as it settles.
    pub async fn run<F, T, E>(self, coordinator: &PopupCoordinator, action: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        tokio::spawn(suppress(
            coordinator.clone(),
            self.state.clone(),
            self.check_interval,
            self.max_duration,
        ));

        let result = action.await;
        if let Err(e) = &result {
            *self.state.last_error.lock() = Some(e.to_string());
        }
        self.state.token.cancel();

        debug!(
            "Suppressed action settled after {:?} with {} background pass(es)",
            self.state.started_at.elapsed(),
            self.state.passes.load(Ordering::SeqCst)
        );
        result
    }
}

impl Drop for SuppressionSession {
    fn drop(&mut self) {
        self.state.token.cancel();
    }
}

async fn suppress(
    coordinator: PopupCoordinator,
    state: Arc<SessionState>,
    check_interval: Duration,
    max_duration: Duration,
) {
    let deadline = state.started_at + max_duration;
    let mut ticker = tokio::time::interval_at(state.started_at + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = state.token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                debug!("Suppression reached max duration of {:?}", max_duration);
                state.token.cancel();
                break;
            }
            _ = ticker.tick() => {
                trace!("Background dismissal pass");
                coordinator.dismiss_all().await;
                state.passes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
