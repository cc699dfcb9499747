//! Popup coordinator: one entry point for every known overlay type

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{PopupConfig, SequenceOptions, SuppressionOptions, TimingConfig};
use crate::driver::PageDriver;
use crate::orchestrator::{Dismissal, Orchestrator};
use crate::suppression::SuppressionSession;

/// An action run as one element of a suppressed sequence
pub type SequenceAction<'a, E> = BoxFuture<'a, Result<(), E>>;

/// Owns one detector/orchestrator pair per configured overlay type.
/// Clones share the same orchestrators and pass lock.
#[derive(Clone)]
pub struct PopupCoordinator {
    driver: Arc<dyn PageDriver>,
    orchestrators: Arc<[Orchestrator]>,
    timing: TimingConfig,
    suppression: SuppressionOptions,
    sequence: SequenceOptions,
    /// Serializes dismissal passes so background and explicit passes never interleave
    pass_lock: Arc<Mutex<()>>,
}

impl PopupCoordinator {
    /// Coordinator over the built-in overlay types with default timings
    pub fn new(driver: Arc<dyn PageDriver>) -> Self {
        Self::with_config(driver, &PopupConfig::default())
    }

    pub fn with_config(driver: Arc<dyn PageDriver>, config: &PopupConfig) -> Self {
        let orchestrators = config
            .overlay_types()
            .into_iter()
            .map(|overlay| Orchestrator::new(driver.clone(), overlay, config.timing.clone()))
            .collect();

        Self {
            driver,
            orchestrators,
            timing: config.timing.clone(),
            suppression: config.suppression.clone(),
            sequence: config.sequence.clone(),
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Overlay type names in dismissal order
    pub fn overlay_names(&self) -> impl Iterator<Item = &str> {
        self.orchestrators.iter().map(|o| o.name())
    }

    pub fn suppression_defaults(&self) -> &SuppressionOptions {
        &self.suppression
    }

    pub fn sequence_defaults(&self) -> &SequenceOptions {
        &self.sequence
    }

    fn orchestrator(&self, name: &str) -> Option<&Orchestrator> {
        self.orchestrators.iter().find(|o| o.name() == name)
    }

    /// Dismiss every overlay type in order; never fails
    pub async fn dismiss_all(&self) {
        let _pass = self.pass_lock.lock().await;
        for orchestrator in self.orchestrators.iter() {
            orchestrator.dismiss().await;
        }
    }

    /// Dismiss one overlay type; `None` if the name is unknown
    pub async fn dismiss(&self, name: &str) -> Option<Dismissal> {
        let orchestrator = self.orchestrator(name)?;
        let _pass = self.pass_lock.lock().await;
        Some(orchestrator.dismiss().await)
    }

    /// Fresh visibility check for one overlay type; unknown names are not visible
    pub async fn is_visible(&self, name: &str) -> bool {
        match self.orchestrator(name) {
            Some(orchestrator) => orchestrator.detector().is_visible().await,
            None => false,
        }
    }

    /// Wait up to `timeout` for the overlay to show up, then dismiss it.
    /// The overlay never appearing is not an error.
    pub async fn wait_and_dismiss(&self, name: &str, timeout: Duration) -> Option<Dismissal> {
        let orchestrator = self.orchestrator(name)?;

        let mut appeared = false;
        for target in orchestrator.detector().presence().wait_targets() {
            match self.driver.wait_for_visible(&target, timeout).await {
                Ok(true) => {
                    appeared = true;
                    break;
                }
                Ok(false) => debug!("{} did not appear within {:?}", target, timeout),
                Err(e) => debug!("Waiting for {} failed: {}", target, e),
            }
        }
        debug!("{} appeared: {}", name, appeared);

        self.driver.settle(self.timing.appear_settle()).await;

        let _pass = self.pass_lock.lock().await;
        Some(orchestrator.dismiss().await)
    }

    /// `wait_and_dismiss` for every overlay type, one after the other
    pub async fn wait_and_dismiss_all(&self, timeout: Duration) {
        for orchestrator in self.orchestrators.iter() {
            self.wait_and_dismiss(orchestrator.name(), timeout).await;
        }
    }

    /// `max_retries + 1` passes with `retry_delay` between them, for popups
    /// that show up late or more than once
    pub async fn dismiss_with_retry(&self, max_retries: usize, retry_delay: Duration) {
        for attempt in 0..=max_retries {
            self.dismiss_all().await;
            if attempt < max_retries {
                self.driver.settle(retry_delay).await;
            }
        }
    }

    /// Let a freshly navigated page settle, then clear popups twice to catch
    /// ones that open shortly after load
    pub async fn dismiss_after_navigation(&self, wait: Duration) {
        self.driver.settle(wait).await;
        self.dismiss_all().await;
        self.driver.settle(self.timing.appear_settle()).await;
        self.dismiss_all().await;
    }

    /// Clear popups before and after `action`, returning its output
    pub async fn dismiss_around<F, T>(&self, action: F) -> T
    where
        F: Future<Output = T>,
    {
        self.dismiss_all().await;
        let output = action.await;
        self.dismiss_all().await;
        output
    }

    /// Run `action` with popups suppressed before, during and after it.
    ///
    /// Returns the action's result unchanged; its error is re-raised only
    /// after the closing dismissal pass. That pass queues behind any
    /// background pass still in flight.
    pub async fn run_with_suppression<F, T, E>(&self, action: F, options: &SuppressionOptions) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        if options.dismiss_before {
            self.dismiss_all().await;
        }

        let session = SuppressionSession::new(options);
        let handle = session.handle();
        let result = session.run(self, action).await;

        if options.dismiss_after {
            self.dismiss_all().await;
        }

        if let Some(error) = handle.last_error() {
            info!("Suppressed action failed after {} background pass(es): {}", handle.passes(), error);
        }
        result
    }

    /// Run `actions` in order under background suppression.
    ///
    /// Popups are cleared before the first action, between actions when
    /// `dismiss_between` is set, and after the last one. The first failing
    /// action stops the sequence; its error is returned after a final pass.
    pub async fn run_sequence_with_suppression<'a, E>(
        &self,
        actions: Vec<SequenceAction<'a, E>>,
        options: &SequenceOptions,
    ) -> Result<(), E>
    where
        E: Display,
    {
        let total = actions.len();
        let sequence = async {
            for (index, action) in actions.into_iter().enumerate() {
                if index > 0 && options.dismiss_between {
                    self.driver.settle(options.pause_between()).await;
                    self.dismiss_all().await;
                }
                debug!("Sequence step {}/{}", index + 1, total);
                action.await?;
            }
            Ok::<(), E>(())
        };

        self.run_with_suppression(sequence, &options.suppression()).await
    }
}
