//! Playwright browser automation
//!
//! [`PlaywrightPage`] keeps one Node process alive for the lifetime of a page
//! and drives it over a line-delimited JSON protocol: each request is a single
//! JSON object on the bridge's stdin, answered by one JSON object on stdout
//! carrying the same `id`.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::driver::{BoundingBox, ComputedStyle, PageDriver, Point, Target};
use crate::error::{E2eError, E2eResult};

/// Node side of the bridge. Launch options arrive as a JSON argument.
const BRIDGE_SCRIPT: &str = r#"
const { chromium, firefox, webkit } = require('playwright');
const readline = require('readline');

const options = JSON.parse(process.argv[2]);
const engines = { chromium, firefox, webkit };

const send = (message) => process.stdout.write(JSON.stringify(message) + '\n');

const STYLE_OF = (el) => {
  const s = window.getComputedStyle(el);
  return { display: s.display, visibility: s.visibility, opacity: s.opacity };
};

(async () => {
  const browser = await engines[options.browser].launch({ headless: options.headless });
  const context = await browser.newContext({
    viewport: { width: options.viewport_width, height: options.viewport_height },
  });
  const page = await context.newPage();

  const resolve = (target) => {
    const scope = target.frame ? page.frameLocator(target.frame).first() : page;
    let locator = null;
    for (const segment of target.segments) {
      locator = (locator || scope).locator(segment.selector);
      if (segment.nth !== null && segment.nth !== undefined) {
        locator = locator.nth(segment.nth);
      }
    }
    return locator;
  };

  const handlers = {
    count: (r) => resolve(r.target).count(),
    is_visible: (r) => resolve(r.target).isVisible({ timeout: r.timeout_ms }),
    computed_style: (r) => resolve(r.target).evaluate(STYLE_OF, null, { timeout: r.timeout_ms }),
    closest_style: (r) => resolve(r.target).evaluate((el, selector) => {
      const ancestor = el.parentElement ? el.parentElement.closest(selector) : null;
      if (!ancestor) return null;
      const s = window.getComputedStyle(ancestor);
      return { display: s.display, visibility: s.visibility, opacity: s.opacity };
    }, r.ancestor, { timeout: r.timeout_ms }),
    attribute: (r) => resolve(r.target).getAttribute(r.name, { timeout: r.timeout_ms }),
    text_content: (r) => resolve(r.target).textContent({ timeout: r.timeout_ms }),
    bounding_box: (r) => resolve(r.target).boundingBox({ timeout: r.timeout_ms }),
    click: async (r) => {
      const opts = { timeout: r.timeout_ms };
      if (r.position) opts.position = r.position;
      await resolve(r.target).click(opts);
      return null;
    },
    mouse_click: async (r) => { await page.mouse.click(r.x, r.y); return null; },
    press_key: async (r) => { await page.keyboard.press(r.key); return null; },
    wait_for_visible: async (r) => {
      try {
        await resolve(r.target).waitFor({ state: 'visible', timeout: r.timeout_ms });
        return true;
      } catch (error) {
        if (error && error.name === 'TimeoutError') return false;
        throw error;
      }
    },
    goto: async (r) => { await page.goto(r.url, { waitUntil: r.wait_until }); return null; },
    set_content: async (r) => { await page.setContent(r.html); return null; },
    title: () => page.title(),
    url: async () => page.url(),
    close: async () => null,
  };

  send({ ready: true });

  const input = readline.createInterface({ input: process.stdin });
  for await (const line of input) {
    if (!line.trim()) continue;
    let request;
    try {
      request = JSON.parse(line);
    } catch (error) {
      send({ id: null, ok: false, error: 'malformed request: ' + error.message });
      continue;
    }
    try {
      const handler = handlers[request.op];
      if (!handler) throw new Error('unknown op: ' + request.op);
      const value = await handler(request);
      send({ id: request.id, ok: true, value: value === undefined ? null : value });
    } catch (error) {
      send({ id: request.id, ok: false, error: String((error && error.message) || error) });
    }
    if (request.op === 'close') break;
  }

  await browser.close();
})().catch((error) => {
  console.error(JSON.stringify({ fatal: String((error && error.message) || error) }));
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// When `goto` considers navigation finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[default]
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    /// Storefront root that relative URLs resolve against
    pub base_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    /// Upper bound for any single bridge request
    pub request_timeout_ms: u64,
    /// Upper bound for browser launch
    pub launch_timeout_ms: u64,
    /// Node executable
    pub node_binary: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.showpo.com/".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            request_timeout_ms: 30_000,
            launch_timeout_ms: 60_000,
            node_binary: PathBuf::from("node"),
        }
    }
}

impl PlaywrightConfig {
    /// Resolve `url` against the base URL unless it is already absolute
    pub fn resolve_url(&self, url: &str) -> String {
        if url.contains("://") || url.starts_with("data:") || url.starts_with("about:") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeOp {
    Count { target: Target },
    IsVisible { target: Target, timeout_ms: u64 },
    ComputedStyle { target: Target, timeout_ms: u64 },
    ClosestStyle { target: Target, ancestor: String, timeout_ms: u64 },
    Attribute { target: Target, name: String, timeout_ms: u64 },
    TextContent { target: Target, timeout_ms: u64 },
    BoundingBox { target: Target, timeout_ms: u64 },
    Click { target: Target, position: Option<Point>, timeout_ms: u64 },
    MouseClick { x: f64, y: f64 },
    PressKey { key: String },
    WaitForVisible { target: Target, timeout_ms: u64 },
    Goto { url: String, wait_until: &'static str },
    SetContent { html: String },
    Title,
    Url,
    Close,
}

#[derive(Debug, Serialize)]
struct Request {
    id: u64,
    #[serde(flatten)]
    command: BridgeOp,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Classify one stdout line from the bridge
fn parse_line(line: &str) -> Option<Response> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

struct BridgeIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A browser page driven through a persistent Playwright bridge process
pub struct PlaywrightPage {
    config: PlaywrightConfig,
    io: Mutex<BridgeIo>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightPage {
    /// Launch a browser and open a blank page
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let options = serde_json::json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "viewport_width": config.viewport_width,
            "viewport_height": config.viewport_height,
        });

        info!(
            "Launching {} ({}x{}, headless: {})",
            config.browser.as_str(),
            config.viewport_width,
            config.viewport_height,
            config.headless
        );

        // The script lives in a temp dir, so point module resolution back at
        // the suite's own node_modules
        let cwd = std::env::current_dir()?;
        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .arg(options.to_string())
            .current_dir(&cwd)
            .env("NODE_PATH", cwd.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("Failed to spawn bridge: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdout unavailable".to_string()))?;

        let mut io = BridgeIo {
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let launch_timeout = Duration::from_millis(config.launch_timeout_ms);
        tokio::time::timeout(launch_timeout, Self::await_ready(&mut io))
            .await
            .map_err(|_| E2eError::Timeout("browser launch".to_string()))??;

        debug!("Bridge ready: {}", script_path.display());

        Ok(Self {
            config,
            io: Mutex::new(io),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            _script_dir: script_dir,
        })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    async fn await_ready(io: &mut BridgeIo) -> E2eResult<()> {
        while let Some(line) = io.stdout.next_line().await? {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                trace!("bridge: {}", line);
                continue;
            };
            if value.get("ready").and_then(|v| v.as_bool()) == Some(true) {
                return Ok(());
            }
        }
        Err(E2eError::BridgeClosed)
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    async fn request<T: DeserializeOwned>(&self, command: BridgeOp) -> E2eResult<T> {
        self.request_within(command, Duration::from_millis(self.config.request_timeout_ms))
            .await
    }

    async fn request_within<T: DeserializeOwned>(&self, command: BridgeOp, timeout: Duration) -> E2eResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&Request { id, command })?;
        line.push('\n');

        let mut io = self.io.lock().await;

        let exchange = async {
            io.stdin.write_all(line.as_bytes()).await?;
            io.stdin.flush().await?;

            while let Some(reply) = io.stdout.next_line().await? {
                let Some(response) = parse_line(&reply) else {
                    trace!("bridge: {}", reply);
                    continue;
                };
                if response.id != Some(id) {
                    warn!("Discarding bridge response for request {:?}", response.id);
                    continue;
                }
                return Ok(response);
            }
            Err(E2eError::BridgeClosed)
        };

        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| E2eError::Timeout(format!("bridge request {}", id)))??;

        if !response.ok {
            return Err(E2eError::Playwright(
                response.error.unwrap_or_else(|| "unknown bridge error".to_string()),
            ));
        }
        serde_json::from_value(response.value)
            .map_err(|e| E2eError::Protocol(format!("unexpected reply to request {}: {}", id, e)))
    }

    /// Navigate, resolving relative URLs against the configured base URL
    pub async fn goto(&self, url: &str, wait_until: WaitUntil) -> E2eResult<()> {
        let url = self.config.resolve_url(url);
        debug!("Navigating to {}", url);
        self.request::<serde_json::Value>(BridgeOp::Goto {
            url,
            wait_until: wait_until.as_str(),
        })
        .await?;
        Ok(())
    }

    /// Replace the document with `html`
    pub async fn set_content(&self, html: &str) -> E2eResult<()> {
        self.request::<serde_json::Value>(BridgeOp::SetContent { html: html.to_string() })
            .await?;
        Ok(())
    }

    pub async fn title(&self) -> E2eResult<String> {
        self.request(BridgeOp::Title).await
    }

    pub async fn url(&self) -> E2eResult<String> {
        self.request(BridgeOp::Url).await
    }

    /// Close the browser and wait for the bridge to exit
    pub async fn close(&self) -> E2eResult<()> {
        self.request::<serde_json::Value>(BridgeOp::Close).await?;
        let status = self.child.lock().await.wait().await?;
        debug!("Bridge exited with {}", status);
        Ok(())
    }
}

fn millis(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}

/// Default per-query timeout for reads that carry no explicit one
const READ_TIMEOUT_MS: u64 = 1000;

#[async_trait]
impl PageDriver for PlaywrightPage {
    async fn count(&self, target: &Target) -> E2eResult<usize> {
        self.request(BridgeOp::Count { target: target.clone() }).await
    }

    async fn is_visible(&self, target: &Target, timeout: Duration) -> E2eResult<bool> {
        self.request(BridgeOp::IsVisible {
            target: target.clone(),
            timeout_ms: millis(timeout),
        })
        .await
    }

    async fn computed_style(&self, target: &Target) -> E2eResult<ComputedStyle> {
        self.request(BridgeOp::ComputedStyle {
            target: target.clone(),
            timeout_ms: READ_TIMEOUT_MS,
        })
        .await
    }

    async fn closest_style(&self, target: &Target, ancestor: &str) -> E2eResult<Option<ComputedStyle>> {
        self.request(BridgeOp::ClosestStyle {
            target: target.clone(),
            ancestor: ancestor.to_string(),
            timeout_ms: READ_TIMEOUT_MS,
        })
        .await
    }

    async fn attribute(&self, target: &Target, name: &str) -> E2eResult<Option<String>> {
        self.request(BridgeOp::Attribute {
            target: target.clone(),
            name: name.to_string(),
            timeout_ms: READ_TIMEOUT_MS,
        })
        .await
    }

    async fn text_content(&self, target: &Target) -> E2eResult<Option<String>> {
        self.request(BridgeOp::TextContent {
            target: target.clone(),
            timeout_ms: READ_TIMEOUT_MS,
        })
        .await
    }

    async fn bounding_box(&self, target: &Target) -> E2eResult<Option<BoundingBox>> {
        self.request(BridgeOp::BoundingBox {
            target: target.clone(),
            timeout_ms: READ_TIMEOUT_MS,
        })
        .await
    }

    async fn click(&self, target: &Target, position: Option<Point>, timeout: Duration) -> E2eResult<()> {
        self.request::<serde_json::Value>(BridgeOp::Click {
            target: target.clone(),
            position,
            timeout_ms: millis(timeout),
        })
        .await?;
        Ok(())
    }

    async fn mouse_click(&self, point: Point) -> E2eResult<()> {
        self.request::<serde_json::Value>(BridgeOp::MouseClick { x: point.x, y: point.y })
            .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> E2eResult<()> {
        self.request::<serde_json::Value>(BridgeOp::PressKey { key: key.to_string() })
            .await?;
        Ok(())
    }

    async fn wait_for_visible(&self, target: &Target, timeout: Duration) -> E2eResult<bool> {
        // The bridge enforces the wait; the round trip gets the usual budget on top
        let budget = timeout + Duration::from_millis(self.config.request_timeout_ms);
        self.request_within(
            BridgeOp::WaitForVisible {
                target: target.clone(),
                timeout_ms: millis(timeout),
            },
            budget,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = Request {
            id: 7,
            command: BridgeOp::IsVisible {
                target: Target::css(".modal").first(),
                timeout_ms: 500,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["op"], "is_visible");
        assert_eq!(value["timeout_ms"], 500);
        assert_eq!(value["target"]["frame"], serde_json::Value::Null);
        assert_eq!(value["target"]["segments"][0]["selector"], ".modal");
        assert_eq!(value["target"]["segments"][0]["nth"], 0);
    }

    #[test]
    fn test_unit_commands_carry_only_op() {
        let value = serde_json::to_value(Request { id: 1, command: BridgeOp::Title }).unwrap();
        assert_eq!(value, serde_json::json!({ "id": 1, "op": "title" }));
    }

    #[test]
    fn test_parse_bridge_lines() {
        let ok = parse_line(r#"{"id":3,"ok":true,"value":{"x":1,"y":2,"width":3,"height":4}}"#).unwrap();
        assert_eq!(ok.id, Some(3));
        let bbox: Option<BoundingBox> = serde_json::from_value(ok.value).unwrap();
        assert_eq!(bbox.unwrap().width, 3.0);

        let failed = parse_line(r#"{"id":4,"ok":false,"error":"Timeout 500ms exceeded"}"#).unwrap();
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("Timeout 500ms exceeded"));

        assert!(parse_line("(node:123) ExperimentalWarning: something").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_resolve_url() {
        let config = PlaywrightConfig {
            base_url: "https://shop.example.com/uk/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolve_url("/dresses/"), "https://shop.example.com/uk/dresses/");
        assert_eq!(config.resolve_url("login"), "https://shop.example.com/uk/login");
        assert_eq!(config.resolve_url("https://other.example/"), "https://other.example/");
        assert_eq!(config.resolve_url("about:blank"), "about:blank");
    }

    #[test]
    fn test_bridge_script_handles_every_command() {
        for op in [
            "count", "is_visible", "computed_style", "closest_style", "attribute", "text_content",
            "bounding_box", "click", "mouse_click", "press_key", "wait_for_visible", "goto",
            "set_content", "title", "url", "close",
        ] {
            assert!(BRIDGE_SCRIPT.contains(&format!("    {}: ", op)), "missing handler for {}", op);
        }
    }
}
