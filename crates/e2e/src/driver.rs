//! Page driver capabilities consumed by the popup engine
//!
//! The engine never talks to a browser directly. Everything it needs (element
//! queries, computed styles, geometry, synthetic input and timed waits) goes
//! through [`PageDriver`], which keeps the dismissal logic testable against a
//! scripted page and portable across automation backends.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// One step of a locator chain: a selector, optionally narrowed to the n-th match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub selector: String,
    pub nth: Option<usize>,
}

/// A lazily-resolved element description, scoped to the main document or to
/// the first embedded frame matching `frame`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub frame: Option<String>,
    pub segments: Vec<Segment>,
}

impl Target {
    /// All elements matching `selector` in the main document
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            frame: None,
            segments: vec![Segment { selector: selector.into(), nth: None }],
        }
    }

    /// All elements matching `selector` inside the first frame matching `frame`
    pub fn in_frame(frame: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            frame: Some(frame.into()),
            ..Self::css(selector)
        }
    }

    /// Narrow the last segment to its n-th match
    pub fn nth(mut self, index: usize) -> Self {
        if let Some(last) = self.segments.last_mut() {
            last.nth = Some(index);
        }
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    /// Descendants of this target matching `selector`
    pub fn locate(mut self, selector: impl Into<String>) -> Self {
        self.segments.push(Segment { selector: selector.into(), nth: None });
        self
    }

    /// Selector of the innermost segment
    pub fn leaf(&self) -> &str {
        self.segments.last().map(|s| s.selector.as_str()).unwrap_or("")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(frame) = &self.frame {
            write!(f, "frame({}) ", frame)?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(" >> ")?;
            }
            f.write_str(&segment.selector)?;
            if let Some(n) = segment.nth {
                write!(f, " [{}]", n)?;
            }
        }
        Ok(())
    }
}

/// The computed-style properties that decide whether an element is really shown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
}

impl ComputedStyle {
    /// Not `display:none`, not `visibility:hidden`, not fully transparent
    pub fn is_rendered(&self) -> bool {
        let transparent = self
            .opacity
            .trim()
            .parse::<f64>()
            .map(|o| o == 0.0)
            .unwrap_or(false);
        self.display != "none" && self.visibility != "hidden" && !transparent
    }
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: "1".to_string(),
        }
    }
}

/// A viewport coordinate in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Browser capabilities the popup engine relies on
///
/// Implementations report failures as errors; the engine decides which of
/// them are fatal (none, for dismissal internals).
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Number of elements currently matching the target
    async fn count(&self, target: &Target) -> E2eResult<usize>;

    /// Whether the target is visible, waiting at most `timeout`
    async fn is_visible(&self, target: &Target, timeout: Duration) -> E2eResult<bool>;

    /// Computed style of the target element
    async fn computed_style(&self, target: &Target) -> E2eResult<ComputedStyle>;

    /// Computed style of the nearest proper ancestor matching `ancestor`, if any
    async fn closest_style(&self, target: &Target, ancestor: &str) -> E2eResult<Option<ComputedStyle>>;

    async fn attribute(&self, target: &Target, name: &str) -> E2eResult<Option<String>>;

    async fn text_content(&self, target: &Target) -> E2eResult<Option<String>>;

    /// On-screen geometry, `None` when the element is not laid out
    async fn bounding_box(&self, target: &Target) -> E2eResult<Option<BoundingBox>>;

    /// Click the element, optionally at an offset relative to its top-left corner
    async fn click(&self, target: &Target, position: Option<Point>, timeout: Duration) -> E2eResult<()>;

    /// Click at absolute viewport coordinates
    async fn mouse_click(&self, point: Point) -> E2eResult<()>;

    async fn press_key(&self, key: &str) -> E2eResult<()>;

    /// Block until the target is visible; `Ok(false)` when `timeout` elapses first
    async fn wait_for_visible(&self, target: &Target, timeout: Duration) -> E2eResult<bool>;

    /// Unstructured delay letting the page react to input
    async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_style() {
        assert!(ComputedStyle::default().is_rendered());

        let hidden = ComputedStyle {
            visibility: "hidden".to_string(),
            ..Default::default()
        };
        assert!(!hidden.is_rendered());

        let none = ComputedStyle {
            display: "none".to_string(),
            ..Default::default()
        };
        assert!(!none.is_rendered());
    }

    #[test]
    fn test_zero_opacity_in_any_spelling() {
        for opacity in ["0", "0.0", " 0 "] {
            let style = ComputedStyle {
                opacity: opacity.to_string(),
                ..Default::default()
            };
            assert!(!style.is_rendered(), "opacity {:?} should hide", opacity);
        }

        let faint = ComputedStyle {
            opacity: "0.01".to_string(),
            ..Default::default()
        };
        assert!(faint.is_rendered());
    }

    #[test]
    fn test_target_chain_display() {
        let target = Target::css("[role=\"dialog\"]").first().locate("button").first();
        assert_eq!(target.to_string(), "[role=\"dialog\"] [0] >> button [0]");
        assert_eq!(target.leaf(), "button");

        let framed = Target::in_frame("iframe[src*=\"klaviyo\" i]", ".kl").nth(2);
        assert_eq!(framed.to_string(), "frame(iframe[src*=\"klaviyo\" i]) .kl [2]");
    }
}
