//! Storefront E2E support
//!
//! Storefront pages are littered with popups that open on their own schedule:
//! email-capture modals, region-redirect dialogs. This crate keeps them out of
//! the way of browser tests:
//! - Detects overlays from a data-driven table of overlay types
//! - Dismisses them with ordered, self-verifying strategies
//! - Suppresses them in the background while a test action runs
//! - Drives a real browser through a persistent Playwright bridge
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PopupCoordinator                                           │
//! │    ├── dismiss_all() / dismiss(name)                        │
//! │    ├── wait_and_dismiss(name, timeout)                      │
//! │    ├── run_with_suppression(action, options)                │
//! │    │     └── SuppressionSession (timer on its own task)     │
//! │    └── run_sequence_with_suppression(actions, options)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestrator (one per OverlayType)                         │
//! │    ├── Detector::is_visible()                               │
//! │    └── strategies: close control │ semantic button │        │
//! │          escape │ click outside │ escape │ safety click     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PageDriver                                                 │
//! │    ├── PlaywrightPage (node bridge, JSON lines)             │
//! │    └── testing::ScriptedPage (in-memory)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod detector;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod overlay;
pub mod playwright;
pub mod suppression;
pub mod testing;

pub use config::{PopupConfig, SequenceOptions, SuiteConfig, SuppressionOptions, TimingConfig};
pub use coordinator::{PopupCoordinator, SequenceAction};
pub use driver::{PageDriver, Target};
pub use error::{E2eError, E2eResult};
pub use orchestrator::{Dismissal, DismissalOutcome};
pub use overlay::OverlayType;
pub use playwright::{PlaywrightConfig, PlaywrightPage};
pub use suppression::{SuppressionHandle, SuppressionSession};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber honouring `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_installs_global_subscriber_once() {
        init_tracing();
        init_tracing();
        assert!(tracing::dispatcher::has_been_set());
    }
}
