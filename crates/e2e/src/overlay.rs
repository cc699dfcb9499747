//! Overlay type definitions
//!
//! An overlay type is pure data: how to find its root container, what makes a
//! candidate count as open, and the ordered dismissal strategies to try. One
//! generic detector and orchestrator consume every definition, so supporting
//! a new storefront popup is a matter of adding a table entry (in code or in
//! the suite's TOML config).

use serde::{Deserialize, Serialize};

use crate::driver::{Point, Target};

pub const SUBSCRIPTION_MODAL: &str = "subscription-modal";
pub const REGION_REDIRECT_DIALOG: &str = "region-redirect-dialog";

/// Corner used when a click-outside has nothing better to aim at
pub const SAFE_CORNER: Point = Point::new(10.0, 10.0);

/// Last-resort click position once every other strategy failed
pub const SAFETY_CORNER: Point = Point::new(5.0, 5.0);

/// A named category of obstructive overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayType {
    pub name: String,
    pub presence: Presence,
    /// Tried in order; the first confirmed dismissal ends the pass
    pub strategies: Vec<Strategy>,
}

/// How to find an overlay's root container and decide that it is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// Alternative root selectors, unioned into one selector list
    pub roots: Vec<String>,

    /// Embedded sub-document that may host the overlay
    #[serde(default)]
    pub frame: Option<String>,

    /// Attribute a candidate root must carry to count as open
    #[serde(default)]
    pub open_attribute: Option<AttributeMatch>,

    /// Text a candidate root must contain
    #[serde(default)]
    pub required_text: Option<String>,

    /// Selectors `wait_and_dismiss` waits on, in order; empty means the roots
    #[serde(default)]
    pub wait_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMatch {
    pub name: String,
    pub value: String,
}

impl Presence {
    pub fn root_selector(&self) -> String {
        self.roots.join(", ")
    }

    /// Every root candidate in the main document
    pub fn root(&self) -> Target {
        Target::css(self.root_selector())
    }

    /// Every root candidate inside the overlay's frame, if it has one
    pub fn framed_roots(&self) -> Option<Target> {
        self.frame
            .as_ref()
            .map(|frame| Target::in_frame(frame.clone(), self.root_selector()))
    }

    pub fn wait_targets(&self) -> Vec<Target> {
        if self.wait_for.is_empty() {
            vec![self.root().first()]
        } else {
            self.wait_for.iter().map(|s| Target::css(s.clone()).first()).collect()
        }
    }
}

/// One named dismissal tactic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    #[serde(flatten)]
    pub tactic: Tactic,
}

impl Strategy {
    pub fn new(name: impl Into<String>, tactic: Tactic) -> Self {
        Self {
            name: name.into(),
            tactic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tactic {
    /// Click the first visible control, searching scopes in order and
    /// selectors in order within each scope
    ClickControl {
        selectors: Vec<String>,
        scopes: Vec<ControlScope>,
    },

    /// Synthesize a key press on the page
    PressKey { key: String },

    /// Click a backdrop, or just outside the overlay root
    ClickOutside {
        #[serde(default)]
        backdrops: Vec<String>,
        #[serde(default = "default_safe_corner")]
        fallback: Point,
    },

    /// Click fixed viewport coordinates
    ClickPoint { point: Point },
}

fn default_safe_corner() -> Point {
    SAFE_CORNER
}

/// Where a control is looked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ControlScope {
    /// Anywhere in the main document
    Document,
    /// Inside the overlay's embedded frame
    Frame,
    /// Inside the first root container
    Root,
    /// Anywhere in the main document, but only when the control's nearest
    /// `ancestor` is rendered
    InsideOpen { ancestor: String },
}

/// Click position for the click-outside tactic: 10px left of the box
/// (clamped to the safe margin) and 10px below its top edge
pub fn click_outside_point(bbox: &crate::driver::BoundingBox) -> Point {
    Point::new((bbox.x - 10.0).max(SAFE_CORNER.x), bbox.y + 10.0)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn escape(name: &str) -> Strategy {
    Strategy::new(name, Tactic::PressKey { key: "Escape".to_string() })
}

fn click_outside(backdrops: &[&str]) -> Strategy {
    Strategy::new(
        "click-outside",
        Tactic::ClickOutside {
            backdrops: strings(backdrops),
            fallback: SAFE_CORNER,
        },
    )
}

fn safety_click() -> Strategy {
    Strategy::new("safety-click", Tactic::ClickPoint { point: SAFETY_CORNER })
}

/// Klaviyo-style email capture modal, possibly rendered inside an iframe
pub fn subscription_modal() -> OverlayType {
    OverlayType {
        name: SUBSCRIPTION_MODAL.to_string(),
        presence: Presence {
            roots: strings(&[
                r#"[class*="kl-private-reset-css"]"#,
                r#"[class*="klaviyo"]"#,
                r#"[id*="klaviyo"]"#,
            ]),
            frame: Some(
                strings(&[
                    r#"iframe[src*="klaviyo" i]"#,
                    r#"iframe[id*="klaviyo" i]"#,
                    r#"iframe[class*="klaviyo" i]"#,
                ])
                .join(", "),
            ),
            open_attribute: None,
            required_text: None,
            wait_for: Vec::new(),
        },
        strategies: vec![
            Strategy::new(
                "close-control",
                Tactic::ClickControl {
                    selectors: strings(&[
                        r#"button[aria-label*="close" i]"#,
                        r#"[aria-label*="close" i]"#,
                        r#"[class*="close" i]"#,
                        r#"button:has-text("×")"#,
                        r#"button:has-text("✕")"#,
                        r#"button:has-text("X")"#,
                        r#"[data-testid*="close" i]"#,
                        r#"[id*="close" i]"#,
                        r#"svg[aria-label*="close" i]"#,
                        ".klaviyo-close",
                        r#"[role="button"][aria-label*="close" i]"#,
                        r#"[class*="modal-close"]"#,
                        r#"[class*="popup-close"]"#,
                    ]),
                    scopes: vec![ControlScope::Document, ControlScope::Frame],
                },
            ),
            escape("escape"),
            click_outside(&[
                r#"[class*="overlay" i]"#,
                r#"[class*="backdrop" i]"#,
                r#"[class*="modal-backdrop" i]"#,
                r#"[class*="klaviyo-overlay" i]"#,
            ]),
            escape("escape-retry"),
            safety_click(),
        ],
    }
}

/// Radix "Region Detection" dialog offering to switch to a regional store
pub fn region_redirect_dialog() -> OverlayType {
    let dialog = r#"[role="dialog"]"#;
    OverlayType {
        name: REGION_REDIRECT_DIALOG.to_string(),
        presence: Presence {
            roots: strings(&[
                r#"[role="dialog"]:has-text("Region Detection")"#,
                r#"[role="dialog"][id^="radix-"]"#,
            ]),
            frame: None,
            open_attribute: Some(AttributeMatch {
                name: "data-state".to_string(),
                value: "open".to_string(),
            }),
            required_text: Some("Region Detection".to_string()),
            wait_for: strings(&[
                r#"[role="dialog"]:has-text("Region Detection")"#,
                r#"[role="dialog"][id^="radix-"]"#,
            ]),
        },
        strategies: vec![
            // Staying put is what a shopper would choose, so it outranks closing
            Strategy::new(
                "stay-on-current-store",
                Tactic::ClickControl {
                    selectors: strings(&[
                        r#"button:has-text("No, Stay on current store")"#,
                        r#"button:has-text("Stay on current store")"#,
                    ]),
                    scopes: vec![ControlScope::Root, ControlScope::Document],
                },
            ),
            Strategy::new(
                "close-control",
                Tactic::ClickControl {
                    selectors: strings(&[
                        r#"button[aria-label*="close" i]"#,
                        r#"[aria-label*="close" i]"#,
                        r#"[role="dialog"] button[class*="close" i]"#,
                        r#"[role="dialog"] button:has-text("×")"#,
                        r#"[role="dialog"] button:has-text("✕")"#,
                        r#"[role="dialog"] button:has-text("X")"#,
                    ]),
                    scopes: vec![
                        ControlScope::Root,
                        ControlScope::InsideOpen {
                            ancestor: dialog.to_string(),
                        },
                    ],
                },
            ),
            escape("escape"),
            click_outside(&[
                r#"[class*="overlay" i]"#,
                r#"[class*="backdrop" i]"#,
                r#"[class*="modal-backdrop" i]"#,
            ]),
            escape("escape-retry"),
            safety_click(),
        ],
    }
}

/// The overlay table used when no configuration overrides it
pub fn builtin_overlays() -> Vec<OverlayType> {
    vec![subscription_modal(), region_redirect_dialog()]
}
