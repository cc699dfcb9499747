//! Scripted page driver for exercising the popup engine without a browser
//!
//! [`ScriptedPage`] holds a flat table of fake elements keyed by frame and
//! selector, records every synthetic input and settle delay, and can change
//! element visibility in reaction to clicks and key presses. Locator chains
//! resolve by their innermost selector once every outer selector has a match.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{BoundingBox, ComputedStyle, PageDriver, Point, Target};
use crate::error::{E2eError, E2eResult};

/// Something observable the engine did to the page
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// Element count query, by innermost selector
    Probe(String),
    Click { selector: String, position: Option<Point> },
    MouseClick(Point),
    Press(String),
    Settle(Duration),
    Wait(String),
    /// Test-inserted marker
    Mark(String),
}

impl PageEvent {
    /// Clicks and key presses
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            PageEvent::Click { .. } | PageEvent::MouseClick(_) | PageEvent::Press(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub visible: bool,
    pub style: ComputedStyle,
    pub attributes: HashMap<String, String>,
    pub text: String,
    pub bbox: Option<BoundingBox>,
    /// Style reported for the nearest matching ancestor
    pub ancestor_style: Option<ComputedStyle>,
}

impl FakeElement {
    pub fn visible() -> Self {
        Self {
            visible: true,
            style: ComputedStyle::default(),
            attributes: HashMap::new(),
            text: String::new(),
            bbox: None,
            ancestor_style: None,
        }
    }

    pub fn hidden() -> Self {
        Self {
            visible: false,
            ..Self::visible()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_bbox(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bbox = Some(BoundingBox { x, y, width, height });
        self
    }

    pub fn with_style(mut self, style: ComputedStyle) -> Self {
        self.style = style;
        self
    }

    pub fn inside(mut self, ancestor_style: ComputedStyle) -> Self {
        self.ancestor_style = Some(ancestor_style);
        self
    }
}

/// Page change applied when a trigger fires
#[derive(Debug, Clone)]
pub enum Reaction {
    /// Hide every element registered under the selector
    Hide(String),
    Show(String),
    Remove(String),
}

#[derive(Default)]
struct PageState {
    elements: HashMap<(Option<String>, String), Vec<FakeElement>>,
    on_click: HashMap<String, Vec<Reaction>>,
    on_key: HashMap<String, Vec<Reaction>>,
    on_mouse: Vec<Reaction>,
    failing: HashSet<String>,
    fail_everything: bool,
    events: Vec<PageEvent>,
}

impl PageState {
    fn check(&self, target: &Target) -> E2eResult<()> {
        if self.fail_everything || target.segments.iter().any(|s| self.failing.contains(&s.selector)) {
            return Err(E2eError::Playwright(format!("scripted failure for {}", target)));
        }
        Ok(())
    }

    /// Matching elements for the innermost segment, honouring its `nth`
    fn resolve(&self, target: &Target) -> E2eResult<Vec<&FakeElement>> {
        self.check(target)?;

        let frame = target.frame.clone();
        let (leaf, outer) = match target.segments.split_last() {
            Some(split) => split,
            None => return Ok(Vec::new()),
        };

        for segment in outer {
            let present = self
                .elements
                .get(&(frame.clone(), segment.selector.clone()))
                .map(|els| match segment.nth {
                    Some(n) => els.len() > n,
                    None => !els.is_empty(),
                })
                .unwrap_or(false);
            if !present {
                return Ok(Vec::new());
            }
        }

        let all = match self.elements.get(&(frame, leaf.selector.clone())) {
            Some(els) => els,
            None => return Ok(Vec::new()),
        };
        Ok(match leaf.nth {
            Some(n) => all.get(n).into_iter().collect(),
            None => all.iter().collect(),
        })
    }

    fn single(&self, target: &Target) -> E2eResult<&FakeElement> {
        self.resolve(target)?
            .into_iter()
            .next()
            .ok_or_else(|| E2eError::NoMatch(target.to_string()))
    }

    fn apply(&mut self, reactions: &[Reaction]) {
        for reaction in reactions {
            match reaction {
                Reaction::Hide(selector) | Reaction::Show(selector) => {
                    let visible = matches!(reaction, Reaction::Show(_));
                    for ((_, key), els) in self.elements.iter_mut() {
                        if key == selector {
                            els.iter_mut().for_each(|el| el.visible = visible);
                        }
                    }
                }
                Reaction::Remove(selector) => {
                    self.elements.retain(|(_, key), _| key != selector);
                }
            }
        }
    }
}

/// In-memory [`PageDriver`]
#[derive(Default)]
pub struct ScriptedPage {
    state: Mutex<PageState>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an element in the main document
    pub fn add(&self, selector: &str, element: FakeElement) -> &Self {
        self.state
            .lock()
            .elements
            .entry((None, selector.to_string()))
            .or_default()
            .push(element);
        self
    }

    /// Register an element inside the frame matching `frame`
    pub fn add_in_frame(&self, frame: &str, selector: &str, element: FakeElement) -> &Self {
        self.state
            .lock()
            .elements
            .entry((Some(frame.to_string()), selector.to_string()))
            .or_default()
            .push(element);
        self
    }

    /// React when an element registered under `selector` is clicked
    pub fn on_click(&self, selector: &str, reaction: Reaction) -> &Self {
        self.state
            .lock()
            .on_click
            .entry(selector.to_string())
            .or_default()
            .push(reaction);
        self
    }

    pub fn on_key(&self, key: &str, reaction: Reaction) -> &Self {
        self.state
            .lock()
            .on_key
            .entry(key.to_string())
            .or_default()
            .push(reaction);
        self
    }

    /// React to any click at absolute coordinates
    pub fn on_mouse_click(&self, reaction: Reaction) -> &Self {
        self.state.lock().on_mouse.push(reaction);
        self
    }

    /// Make every query touching `selector` fail
    pub fn fail_selector(&self, selector: &str) -> &Self {
        self.state.lock().failing.insert(selector.to_string());
        self
    }

    /// Make every driver call fail
    pub fn fail_everything(&self) -> &Self {
        self.state.lock().fail_everything = true;
        self
    }

    pub fn hide(&self, selector: &str) {
        self.state.lock().apply(&[Reaction::Hide(selector.to_string())]);
    }

    pub fn show(&self, selector: &str) {
        self.state.lock().apply(&[Reaction::Show(selector.to_string())]);
    }

    pub fn mark(&self, label: &str) {
        self.state.lock().events.push(PageEvent::Mark(label.to_string()));
    }

    pub fn events(&self) -> Vec<PageEvent> {
        self.state.lock().events.clone()
    }

    /// Events recorded after the first marker with this label
    pub fn events_after(&self, label: &str) -> Vec<PageEvent> {
        let events = self.events();
        let marker = PageEvent::Mark(label.to_string());
        match events.iter().position(|e| *e == marker) {
            Some(i) => events[i + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn inputs(&self) -> Vec<PageEvent> {
        self.events().into_iter().filter(PageEvent::is_input).collect()
    }

    pub fn settles(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PageEvent::Settle(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Count queries issued against `selector`
    pub fn probes(&self, selector: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, PageEvent::Probe(s) if s == selector))
            .count()
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn count(&self, target: &Target) -> E2eResult<usize> {
        let mut state = self.state.lock();
        state.events.push(PageEvent::Probe(target.leaf().to_string()));
        Ok(state.resolve(target)?.len())
    }

    async fn is_visible(&self, target: &Target, _timeout: Duration) -> E2eResult<bool> {
        let state = self.state.lock();
        Ok(state.resolve(target)?.first().map(|el| el.visible).unwrap_or(false))
    }

    async fn computed_style(&self, target: &Target) -> E2eResult<ComputedStyle> {
        Ok(self.state.lock().single(target)?.style.clone())
    }

    async fn closest_style(&self, target: &Target, _ancestor: &str) -> E2eResult<Option<ComputedStyle>> {
        Ok(self.state.lock().single(target)?.ancestor_style.clone())
    }

    async fn attribute(&self, target: &Target, name: &str) -> E2eResult<Option<String>> {
        Ok(self.state.lock().single(target)?.attributes.get(name).cloned())
    }

    async fn text_content(&self, target: &Target) -> E2eResult<Option<String>> {
        Ok(Some(self.state.lock().single(target)?.text.clone()))
    }

    async fn bounding_box(&self, target: &Target) -> E2eResult<Option<BoundingBox>> {
        Ok(self.state.lock().single(target)?.bbox)
    }

    async fn click(&self, target: &Target, position: Option<Point>, _timeout: Duration) -> E2eResult<()> {
        let mut state = self.state.lock();
        let clickable = state.single(target)?.visible;
        if !clickable {
            return Err(E2eError::Timeout(format!("click on hidden {}", target)));
        }
        let selector = target.leaf().to_string();
        state.events.push(PageEvent::Click {
            selector: selector.clone(),
            position,
        });
        let reactions = state.on_click.get(&selector).cloned().unwrap_or_default();
        state.apply(&reactions);
        Ok(())
    }

    async fn mouse_click(&self, point: Point) -> E2eResult<()> {
        let mut state = self.state.lock();
        if state.fail_everything {
            return Err(E2eError::Playwright("scripted failure for mouse".to_string()));
        }
        state.events.push(PageEvent::MouseClick(point));
        let reactions = state.on_mouse.clone();
        state.apply(&reactions);
        Ok(())
    }

    async fn press_key(&self, key: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        if state.fail_everything {
            return Err(E2eError::Playwright("scripted failure for keyboard".to_string()));
        }
        state.events.push(PageEvent::Press(key.to_string()));
        let reactions = state.on_key.get(key).cloned().unwrap_or_default();
        state.apply(&reactions);
        Ok(())
    }

    async fn wait_for_visible(&self, target: &Target, timeout: Duration) -> E2eResult<bool> {
        let visible_now = {
            let mut state = self.state.lock();
            state.events.push(PageEvent::Wait(target.leaf().to_string()));
            state.resolve(target)?.first().map(|el| el.visible).unwrap_or(false)
        };
        if visible_now {
            return Ok(true);
        }

        tokio::time::sleep(timeout).await;
        let state = self.state.lock();
        Ok(state.resolve(target)?.first().map(|el| el.visible).unwrap_or(false))
    }

    async fn settle(&self, duration: Duration) {
        self.state.lock().events.push(PageEvent::Settle(duration));
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_requires_outer_match() {
        let page = ScriptedPage::new();
        page.add("button.stay", FakeElement::visible());

        let scoped = Target::css(".dialog").first().locate("button.stay").first();
        assert!(!page.is_visible(&scoped, Duration::ZERO).await.unwrap());

        page.add(".dialog", FakeElement::visible());
        assert!(page.is_visible(&scoped, Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_click_reaction_hides_target() {
        let page = ScriptedPage::new();
        page.add(".modal", FakeElement::visible())
            .add(".close", FakeElement::visible())
            .on_click(".close", Reaction::Hide(".modal".to_string()));

        page.click(&Target::css(".close").first(), None, Duration::ZERO)
            .await
            .unwrap();

        assert!(!page.is_visible(&Target::css(".modal").first(), Duration::ZERO).await.unwrap());
        assert_eq!(page.inputs().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_selector_errors() {
        let page = ScriptedPage::new();
        page.add(".modal", FakeElement::visible()).fail_selector(".modal");
        assert!(page.count(&Target::css(".modal")).await.is_err());
        assert!(page.computed_style(&Target::css(".modal").first()).await.is_err());
    }
}
