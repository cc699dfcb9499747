//! Overlay visibility detection

use std::sync::Arc;

use tracing::trace;

use crate::config::TimingConfig;
use crate::driver::{PageDriver, Target};
use crate::error::E2eResult;
use crate::overlay::Presence;

/// Answers "is this overlay currently on screen and interactive?"
///
/// Every call queries the page afresh; overlays come and go asynchronously,
/// so nothing is cached between calls.
pub struct Detector {
    driver: Arc<dyn PageDriver>,
    presence: Presence,
    timing: TimingConfig,
}

impl Detector {
    pub fn new(driver: Arc<dyn PageDriver>, presence: Presence, timing: TimingConfig) -> Self {
        Self {
            driver,
            presence,
            timing,
        }
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Never fails: any query error means "not visible"
    pub async fn is_visible(&self) -> bool {
        match self.check().await {
            Ok(visible) => visible,
            Err(e) => {
                trace!("Visibility check for {} failed: {}", self.presence.root_selector(), e);
                false
            }
        }
    }

    async fn check(&self) -> E2eResult<bool> {
        if self.any_open(&self.presence.root()).await? {
            return Ok(true);
        }

        let (Some(frame), Some(framed)) = (&self.presence.frame, self.presence.framed_roots()) else {
            return Ok(false);
        };
        if self.driver.count(&Target::css(frame.clone())).await? == 0 {
            return Ok(false);
        }
        self.any_open(&framed).await
    }

    /// Whether any candidate matched by `roots` passes the open checks
    async fn any_open(&self, roots: &Target) -> E2eResult<bool> {
        let count = self.driver.count(roots).await?;

        for i in 0..count {
            let candidate = roots.clone().nth(i);
            match self.candidate_is_open(&candidate).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => trace!("Skipping candidate {}: {}", candidate, e),
            }
        }
        Ok(false)
    }

    async fn candidate_is_open(&self, candidate: &Target) -> E2eResult<bool> {
        if !self.driver.is_visible(candidate, self.timing.query_timeout()).await? {
            return Ok(false);
        }

        if let Some(text) = &self.presence.required_text {
            let content = self.driver.text_content(candidate).await?.unwrap_or_default();
            if !content.contains(text.as_str()) {
                return Ok(false);
            }
        }

        if let Some(attr) = &self.presence.open_attribute {
            let value = self.driver.attribute(candidate, &attr.name).await?;
            if value.as_deref() != Some(attr.value.as_str()) {
                return Ok(false);
            }
        }

        // Reported-visible nodes can still be mid-transition or styled away
        let style = self.driver.computed_style(candidate).await?;
        Ok(style.is_rendered())
    }
}
