//! Dismissal strategies and the per-overlay orchestrator

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::TimingConfig;
use crate::detector::Detector;
use crate::driver::{PageDriver, Point, Target};
use crate::error::E2eResult;
use crate::overlay::{click_outside_point, ControlScope, OverlayType, Presence, Strategy, Tactic};

/// Offset used when clicking a backdrop element, away from any content it frames
const BACKDROP_OFFSET: Point = Point::new(10.0, 10.0);

/// Result of one strategy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DismissalOutcome {
    /// Nothing to act on
    NotApplicable,
    /// Input was synthesized, effect not yet verified
    Attempted,
    /// The overlay was reported gone after the attempt settled
    Confirmed,
}

/// Result of a whole dismissal pass for one overlay type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Dismissal {
    /// The overlay was not on screen; no input was synthesized
    Absent,
    Dismissed { strategy: String },
    /// Every strategy ran and the overlay is still reported visible
    Persisting,
}

/// Runs one overlay type's strategies in priority order until one is confirmed
pub struct Orchestrator {
    name: String,
    driver: Arc<dyn PageDriver>,
    detector: Detector,
    strategies: Vec<Strategy>,
    timing: TimingConfig,
}

impl Orchestrator {
    pub fn new(driver: Arc<dyn PageDriver>, overlay: OverlayType, timing: TimingConfig) -> Self {
        Self {
            detector: Detector::new(driver.clone(), overlay.presence, timing.clone()),
            name: overlay.name,
            driver,
            strategies: overlay.strategies,
            timing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Best-effort dismissal; a no-op when the overlay is absent
    pub async fn dismiss(&self) -> Dismissal {
        if !self.detector.is_visible().await {
            trace!("{} not visible", self.name);
            return Dismissal::Absent;
        }

        debug!("{} is visible, trying {} strategies", self.name, self.strategies.len());

        for strategy in &self.strategies {
            if self.attempt(strategy).await == DismissalOutcome::Confirmed {
                info!("Dismissed {} via {}", self.name, strategy.name);
                return Dismissal::Dismissed {
                    strategy: strategy.name.clone(),
                };
            }
        }

        warn!("{} still visible after all strategies", self.name);
        Dismissal::Persisting
    }

    /// Execute one strategy, then settle and re-check if it acted
    pub async fn attempt(&self, strategy: &Strategy) -> DismissalOutcome {
        let outcome = match self.execute(&strategy.tactic).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("{}: strategy {} failed: {}", self.name, strategy.name, e);
                DismissalOutcome::NotApplicable
            }
        };

        if outcome != DismissalOutcome::Attempted {
            trace!("{}: strategy {} not applicable", self.name, strategy.name);
            return outcome;
        }

        self.driver.settle(self.timing.settle()).await;

        if self.detector.is_visible().await {
            debug!("{}: still visible after {}", self.name, strategy.name);
            DismissalOutcome::Attempted
        } else {
            DismissalOutcome::Confirmed
        }
    }

    async fn execute(&self, tactic: &Tactic) -> E2eResult<DismissalOutcome> {
        match tactic {
            Tactic::ClickControl { selectors, scopes } => self.click_control(selectors, scopes).await,
            Tactic::PressKey { key } => {
                self.driver.press_key(key).await?;
                Ok(DismissalOutcome::Attempted)
            }
            Tactic::ClickOutside { backdrops, fallback } => self.click_outside(backdrops, *fallback).await,
            Tactic::ClickPoint { point } => {
                self.driver.mouse_click(*point).await?;
                Ok(DismissalOutcome::Attempted)
            }
        }
    }

    fn presence(&self) -> &Presence {
        self.detector.presence()
    }

    async fn click_control(&self, selectors: &[String], scopes: &[ControlScope]) -> E2eResult<DismissalOutcome> {
        for scope in scopes {
            for selector in selectors {
                let Some(target) = self.scoped_target(scope, selector) else {
                    break;
                };

                if !self.is_candidate(&target, scope).await {
                    continue;
                }

                debug!("{}: clicking {}", self.name, target);
                self.driver
                    .click(&target, None, self.timing.interaction_timeout())
                    .await?;
                return Ok(DismissalOutcome::Attempted);
            }
        }

        Ok(DismissalOutcome::NotApplicable)
    }

    fn scoped_target(&self, scope: &ControlScope, selector: &str) -> Option<Target> {
        let presence = self.presence();
        let target = match scope {
            ControlScope::Document | ControlScope::InsideOpen { .. } => Target::css(selector),
            ControlScope::Root => presence.root().first().locate(selector),
            ControlScope::Frame => Target::in_frame(presence.frame.clone()?, selector),
        };
        Some(target.first())
    }

    /// Visible and, for guarded scopes, inside a rendered ancestor.
    /// Query failures disqualify the candidate.
    async fn is_candidate(&self, target: &Target, scope: &ControlScope) -> bool {
        let visible = self
            .driver
            .is_visible(target, self.timing.query_timeout())
            .await
            .unwrap_or(false);
        if !visible {
            return false;
        }

        match scope {
            ControlScope::InsideOpen { ancestor } => matches!(
                self.driver.closest_style(target, ancestor).await,
                Ok(Some(style)) if style.is_rendered()
            ),
            _ => true,
        }
    }

    async fn click_outside(&self, backdrops: &[String], fallback: Point) -> E2eResult<DismissalOutcome> {
        if !backdrops.is_empty() {
            let backdrop = Target::css(backdrops.join(", ")).first();
            let visible = self
                .driver
                .is_visible(&backdrop, self.timing.query_timeout())
                .await
                .unwrap_or(false);
            if visible {
                debug!("{}: clicking backdrop {}", self.name, backdrop);
                self.driver
                    .click(&backdrop, Some(BACKDROP_OFFSET), self.timing.interaction_timeout())
                    .await?;
                return Ok(DismissalOutcome::Attempted);
            }
        }

        let root = self.presence().root().first();
        let root_visible = self
            .driver
            .is_visible(&root, self.timing.query_timeout())
            .await
            .unwrap_or(false);
        if !root_visible {
            return Ok(DismissalOutcome::NotApplicable);
        }

        let point = match self.driver.bounding_box(&root).await {
            Ok(Some(bbox)) => click_outside_point(&bbox),
            Ok(None) => fallback,
            Err(e) => {
                trace!("{}: no bounding box: {}", self.name, e);
                fallback
            }
        };

        debug!("{}: clicking outside at ({}, {})", self.name, point.x, point.y);
        self.driver.mouse_click(point).await?;
        Ok(DismissalOutcome::Attempted)
    }
}
