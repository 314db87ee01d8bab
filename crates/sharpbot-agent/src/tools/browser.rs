//! Browser tool suite — drives a single managed Chromium instance.
//!
//! All operations serialize through one lock so page state stays
//! deterministic. The browser launches lazily on first use.
//!
//! Interactive elements in snapshots are tagged with `data-sb-ref`
//! attributes; `browser_click` / `browser_type` accept either a CSS selector
//! or a `ref=N` handle from the latest snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::base::{optional_i64, optional_string, require_string, Tool};

/// Max text characters returned in a snapshot.
const SNAPSHOT_TEXT_CAP: usize = 8_000;

/// JS that tags interactive elements and returns a page snapshot.
const SNAPSHOT_JS: &str = r#"
(() => {
  const interactive = Array.from(
    document.querySelectorAll('a, button, input, select, textarea, [role="button"]')
  );
  const elements = interactive.slice(0, 200).map((el, i) => {
    el.setAttribute('data-sb-ref', String(i));
    const text = (el.innerText || el.value || el.placeholder || '').trim().slice(0, 80);
    return { ref: i, tag: el.tagName.toLowerCase(), text };
  });
  return {
    title: document.title,
    url: location.href,
    text: document.body ? document.body.innerText : '',
    elements,
  };
})()
"#;

// ─────────────────────────────────────────────
// BrowserManager
// ─────────────────────────────────────────────

struct BrowserState {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    pages: Vec<Page>,
    active: usize,
}

/// Lazily launched, serialized browser.
pub struct BrowserManager {
    headless: bool,
    state: Mutex<Option<BrowserState>>,
}

impl BrowserManager {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            state: Mutex::new(None),
        }
    }

    /// Run `op` against the active page, launching the browser if needed.
    async fn with_active_page<F, Fut, T>(&self, op: F) -> anyhow::Result<T>
    where
        F: FnOnce(Page) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut guard = self.state.lock().await;
        self.ensure_started(&mut guard).await?;
        let state = guard.as_ref().expect("browser state after ensure_started");
        let page = state.pages[state.active].clone();
        // The state lock is held for the whole operation: single-flight.
        op(page).await
    }

    async fn ensure_started(&self, guard: &mut Option<BrowserState>) -> anyhow::Result<()> {
        if guard.is_some() {
            return Ok(());
        }

        info!(headless = self.headless, "launching browser");
        let mut builder = BrowserConfig::builder();
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("browser config error: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to launch browser: {e}"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow::anyhow!("failed to open page: {e}"))?;

        *guard = Some(BrowserState {
            browser,
            handler_task,
            pages: vec![page],
            active: 0,
        });
        Ok(())
    }

    async fn navigate(&self, url: &str) -> anyhow::Result<String> {
        self.with_active_page(|page| async move {
            page.goto(url)
                .await
                .map_err(|e| anyhow::anyhow!("navigation failed: {e}"))?;
            let _ = page.wait_for_navigation().await;
            let title: String = page
                .evaluate("document.title")
                .await
                .ok()
                .and_then(|r| r.into_value().ok())
                .unwrap_or_default();
            Ok(format!("Navigated to {url} — {title}"))
        })
        .await
    }

    async fn snapshot(&self) -> anyhow::Result<String> {
        self.with_active_page(|page| async move {
            let result = page
                .evaluate(SNAPSHOT_JS)
                .await
                .map_err(|e| anyhow::anyhow!("snapshot failed: {e}"))?;
            let mut value: Value = result
                .into_value()
                .map_err(|e| anyhow::anyhow!("snapshot decode failed: {e}"))?;

            if let Some(text) = value.get_mut("text") {
                if let Some(s) = text.as_str() {
                    if s.chars().count() > SNAPSHOT_TEXT_CAP {
                        let capped: String = s.chars().take(SNAPSHOT_TEXT_CAP).collect();
                        *text = Value::String(capped);
                    }
                }
            }

            Ok(serde_json::to_string_pretty(&value).unwrap_or_default())
        })
        .await
    }

    async fn click(&self, target: &str) -> anyhow::Result<String> {
        let selector = resolve_target(target);
        self.with_active_page(|page| async move {
            let element = page
                .find_element(selector.clone())
                .await
                .map_err(|e| anyhow::anyhow!("element not found '{selector}': {e}"))?;
            element
                .click()
                .await
                .map_err(|e| anyhow::anyhow!("click failed: {e}"))?;
            Ok(format!("Clicked {selector}"))
        })
        .await
    }

    async fn type_text(&self, target: &str, text: &str) -> anyhow::Result<String> {
        let selector = resolve_target(target);
        self.with_active_page(|page| async move {
            let element = page
                .find_element(selector.clone())
                .await
                .map_err(|e| anyhow::anyhow!("element not found '{selector}': {e}"))?;
            element
                .click()
                .await
                .map_err(|e| anyhow::anyhow!("focus failed: {e}"))?;
            element
                .type_str(text)
                .await
                .map_err(|e| anyhow::anyhow!("typing failed: {e}"))?;
            Ok(format!("Typed into {selector}"))
        })
        .await
    }

    async fn select_option(&self, target: &str, value: &str) -> anyhow::Result<String> {
        let selector = resolve_target(target);
        let js = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.value = {val}; el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true; }})()",
            sel = serde_json::to_string(&selector).unwrap_or_default(),
            val = serde_json::to_string(value).unwrap_or_default(),
        );
        self.with_active_page(|page| async move {
            let result = page
                .evaluate(js)
                .await
                .map_err(|e| anyhow::anyhow!("select failed: {e}"))?;
            let ok: bool = result.into_value().unwrap_or(false);
            if ok {
                Ok(format!("Selected '{value}' in {selector}"))
            } else {
                anyhow::bail!("element not found: {selector}")
            }
        })
        .await
    }

    async fn press_key(&self, target: Option<&str>, key: &str) -> anyhow::Result<String> {
        let selector = target.map(resolve_target).unwrap_or_else(|| "body".into());
        self.with_active_page(|page| async move {
            let element = page
                .find_element(selector.clone())
                .await
                .map_err(|e| anyhow::anyhow!("element not found '{selector}': {e}"))?;
            element
                .press_key(key)
                .await
                .map_err(|e| anyhow::anyhow!("key press failed: {e}"))?;
            Ok(format!("Pressed {key}"))
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<String> {
        self.with_active_page(|page| async move {
            let result = page
                .evaluate(script)
                .await
                .map_err(|e| anyhow::anyhow!("evaluate failed: {e}"))?;
            let value: Value = result.into_value().unwrap_or(Value::Null);
            Ok(serde_json::to_string_pretty(&value).unwrap_or_default())
        })
        .await
    }

    async fn wait(
        &self,
        selector: Option<&str>,
        text: Option<&str>,
        time_ms: Option<u64>,
    ) -> anyhow::Result<String> {
        if let Some(ms) = time_ms {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            return Ok(format!("Waited {ms}ms"));
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(15);

        if let Some(sel) = selector {
            let selector = resolve_target(sel);
            loop {
                let found = self
                    .with_active_page(|page| {
                        let selector = selector.clone();
                        async move { Ok(page.find_element(selector).await.is_ok()) }
                    })
                    .await?;
                if found {
                    return Ok(format!("Element appeared: {selector}"));
                }
                if std::time::Instant::now() > deadline {
                    anyhow::bail!("timed out waiting for selector: {selector}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        }

        if let Some(needle) = text {
            loop {
                let content: String = self
                    .with_active_page(|page| async move {
                        let result = page
                            .evaluate("document.body ? document.body.innerText : ''")
                            .await
                            .map_err(|e| anyhow::anyhow!("read failed: {e}"))?;
                        Ok(result.into_value().unwrap_or_default())
                    })
                    .await?;
                if content.contains(needle) {
                    return Ok(format!("Text appeared: {needle}"));
                }
                if std::time::Instant::now() > deadline {
                    anyhow::bail!("timed out waiting for text: {needle}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        }

        anyhow::bail!("wait requires selector, text, or time_ms")
    }

    async fn back(&self) -> anyhow::Result<String> {
        self.with_active_page(|page| async move {
            page.evaluate("history.back()")
                .await
                .map_err(|e| anyhow::anyhow!("back failed: {e}"))?;
            let _ = page.wait_for_navigation().await;
            Ok("Went back".to_string())
        })
        .await
    }

    async fn screenshot(&self, path: &str) -> anyhow::Result<String> {
        self.with_active_page(|page| async move {
            let bytes = page
                .screenshot(ScreenshotParams::builder().build())
                .await
                .map_err(|e| anyhow::anyhow!("screenshot failed: {e}"))?;
            std::fs::write(path, &bytes)
                .map_err(|e| anyhow::anyhow!("failed to write {path}: {e}"))?;
            Ok(format!("Saved screenshot ({} bytes) to {path}", bytes.len()))
        })
        .await
    }

    async fn tabs(&self, action: &str, index: Option<usize>) -> anyhow::Result<String> {
        let mut guard = self.state.lock().await;
        self.ensure_started(&mut guard).await?;
        let state = guard.as_mut().expect("browser state after ensure_started");

        match action {
            "list" => {
                let mut lines = Vec::new();
                for (i, page) in state.pages.iter().enumerate() {
                    let url = page
                        .url()
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| "about:blank".into());
                    let marker = if i == state.active { "*" } else { " " };
                    lines.push(format!("{marker} [{i}] {url}"));
                }
                Ok(lines.join("\n"))
            }
            "new" => {
                let page = state
                    .browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to open tab: {e}"))?;
                state.pages.push(page);
                state.active = state.pages.len() - 1;
                Ok(format!("Opened tab {}", state.active))
            }
            "select" => {
                let index =
                    index.ok_or_else(|| anyhow::anyhow!("tab index required for select"))?;
                if index >= state.pages.len() {
                    anyhow::bail!("no such tab: {index}");
                }
                state.active = index;
                Ok(format!("Selected tab {index}"))
            }
            "close" => {
                let index = index.unwrap_or(state.active);
                if index >= state.pages.len() {
                    anyhow::bail!("no such tab: {index}");
                }
                if state.pages.len() == 1 {
                    anyhow::bail!("cannot close the last tab");
                }
                let page = state.pages.remove(index);
                let _ = page.evaluate("window.close()").await;
                if state.active >= state.pages.len() {
                    state.active = state.pages.len() - 1;
                }
                Ok(format!("Closed tab {index}"))
            }
            other => anyhow::bail!("Unknown tabs action: {other}"),
        }
    }

    /// Shut the browser down (gateway shutdown path).
    pub async fn shutdown(&self) {
        let mut guard = self.state.lock().await;
        if let Some(mut state) = guard.take() {
            debug!("shutting down browser");
            if let Err(e) = state.browser.close().await {
                warn!(error = %e, "browser close failed");
            }
            state.handler_task.abort();
        }
    }
}

/// Turn a `ref=N` handle into the snapshot attribute selector; anything else
/// passes through as a CSS selector.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix("ref=") {
        Some(n) => format!("[data-sb-ref=\"{}\"]", n.trim()),
        None => target.to_string(),
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

macro_rules! browser_tool {
    ($name:ident, $tool_name:literal, $description:literal, $params:expr, $execute:expr) => {
        pub struct $name {
            manager: Arc<BrowserManager>,
        }

        impl $name {
            pub fn new(manager: Arc<BrowserManager>) -> Self {
                Self { manager }
            }
        }

        #[async_trait]
        impl Tool for $name {
            fn name(&self) -> &str {
                $tool_name
            }
            fn description(&self) -> &str {
                $description
            }
            fn parameters(&self) -> Value {
                $params
            }
            async fn execute(
                &self,
                params: HashMap<String, Value>,
            ) -> anyhow::Result<String> {
                #[allow(clippy::redundant_closure_call)]
                ($execute)(&self.manager, params).await
            }
        }
    };
}

browser_tool!(
    BrowserNavigateTool,
    "browser_navigate",
    "Navigate the browser to a URL.",
    json!({
        "type": "object",
        "properties": {
            "url": { "type": "string", "description": "URL to open" }
        },
        "required": ["url"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let url = require_string(&params, "url")?;
            manager.navigate(&url).await
        }
    }
);

browser_tool!(
    BrowserSnapshotTool,
    "browser_snapshot",
    "Snapshot the current page: title, URL, visible text, and ref-tagged interactive elements.",
    json!({ "type": "object", "properties": {}, "required": [] }),
    |manager: &Arc<BrowserManager>, _params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move { manager.snapshot().await }
    }
);

browser_tool!(
    BrowserClickTool,
    "browser_click",
    "Click an element by CSS selector or a ref=N handle from the latest snapshot.",
    json!({
        "type": "object",
        "properties": {
            "target": { "type": "string", "description": "CSS selector or ref=N" }
        },
        "required": ["target"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let target = require_string(&params, "target")?;
            manager.click(&target).await
        }
    }
);

browser_tool!(
    BrowserTypeTool,
    "browser_type",
    "Type text into an element (CSS selector or ref=N).",
    json!({
        "type": "object",
        "properties": {
            "target": { "type": "string", "description": "CSS selector or ref=N" },
            "text": { "type": "string", "description": "Text to type" }
        },
        "required": ["target", "text"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let target = require_string(&params, "target")?;
            let text = require_string(&params, "text")?;
            manager.type_text(&target, &text).await
        }
    }
);

browser_tool!(
    BrowserSelectTool,
    "browser_select",
    "Set the value of a <select> element and fire its change event.",
    json!({
        "type": "object",
        "properties": {
            "target": { "type": "string", "description": "CSS selector or ref=N" },
            "value": { "type": "string", "description": "Option value to select" }
        },
        "required": ["target", "value"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let target = require_string(&params, "target")?;
            let value = require_string(&params, "value")?;
            manager.select_option(&target, &value).await
        }
    }
);

browser_tool!(
    BrowserPressKeyTool,
    "browser_press_key",
    "Press a key (e.g. Enter, Tab, ArrowDown), optionally on a specific element.",
    json!({
        "type": "object",
        "properties": {
            "key": { "type": "string", "description": "Key name" },
            "target": { "type": "string", "description": "Optional CSS selector or ref=N" }
        },
        "required": ["key"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let key = require_string(&params, "key")?;
            let target = optional_string(&params, "target");
            manager.press_key(target.as_deref(), &key).await
        }
    }
);

browser_tool!(
    BrowserEvaluateTool,
    "browser_evaluate",
    "Evaluate JavaScript on the current page and return the JSON result.",
    json!({
        "type": "object",
        "properties": {
            "script": { "type": "string", "description": "JavaScript expression" }
        },
        "required": ["script"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let script = require_string(&params, "script")?;
            manager.evaluate(&script).await
        }
    }
);

browser_tool!(
    BrowserWaitTool,
    "browser_wait",
    "Wait for a selector to appear, text to appear, or a fixed time in milliseconds.",
    json!({
        "type": "object",
        "properties": {
            "selector": { "type": "string", "description": "CSS selector or ref=N to wait for" },
            "text": { "type": "string", "description": "Text to wait for" },
            "time_ms": { "type": "integer", "description": "Fixed wait in milliseconds" }
        },
        "required": []
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let selector = optional_string(&params, "selector");
            let text = optional_string(&params, "text");
            let time_ms = optional_i64(&params, "time_ms").map(|t| t.max(0) as u64);
            manager
                .wait(selector.as_deref(), text.as_deref(), time_ms)
                .await
        }
    }
);

browser_tool!(
    BrowserTabsTool,
    "browser_tabs",
    "Manage browser tabs: list, new, select, close.",
    json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["list", "new", "select", "close"],
                "description": "What to do"
            },
            "index": { "type": "integer", "description": "Tab index for select/close" }
        },
        "required": ["action"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let action = require_string(&params, "action")?;
            let index = optional_i64(&params, "index").map(|i| i.max(0) as usize);
            manager.tabs(&action, index).await
        }
    }
);

browser_tool!(
    BrowserBackTool,
    "browser_back",
    "Go back in the browser history.",
    json!({ "type": "object", "properties": {}, "required": [] }),
    |manager: &Arc<BrowserManager>, _params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move { manager.back().await }
    }
);

browser_tool!(
    BrowserScreenshotTool,
    "browser_screenshot",
    "Screenshot the current page to a PNG file.",
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "Where to save the PNG" }
        },
        "required": ["path"]
    }),
    |manager: &Arc<BrowserManager>, params: HashMap<String, Value>| {
        let manager = manager.clone();
        async move {
            let path = require_string(&params, "path")?;
            manager.screenshot(&path).await
        }
    }
);

/// The full browser tool suite sharing one manager.
pub fn browser_tools(manager: Arc<BrowserManager>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(BrowserNavigateTool::new(manager.clone())),
        Arc::new(BrowserSnapshotTool::new(manager.clone())),
        Arc::new(BrowserClickTool::new(manager.clone())),
        Arc::new(BrowserTypeTool::new(manager.clone())),
        Arc::new(BrowserSelectTool::new(manager.clone())),
        Arc::new(BrowserPressKeyTool::new(manager.clone())),
        Arc::new(BrowserEvaluateTool::new(manager.clone())),
        Arc::new(BrowserWaitTool::new(manager.clone())),
        Arc::new(BrowserTabsTool::new(manager.clone())),
        Arc::new(BrowserBackTool::new(manager.clone())),
        Arc::new(BrowserScreenshotTool::new(manager)),
    ]
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
