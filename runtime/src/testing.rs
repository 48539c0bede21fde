//! Scripted in-memory browser for exercising the session, capture and
//! pipeline layers without Chromium.
//!
//! A [`Script`] holds a set of visible controls plus rules that fire on
//! navigation or clicks. Rules can show and hide controls, drop a file into
//! the armed download directory, or produce a network response for an
//! armed interception.
//!
//! ```ignore
//! let script = Script::new()
//!     .on_navigate("/sold", Effect::new().show(Locator::text("Download All")))
//!     .on_click(Locator::text("Download All"), Effect::new().download(csv));
//! let mut ctx = script.context();
//! pipeline.run(ctx.as_mut(), &queries).await;
//! assert_eq!(script.clicks().len(), queries.len());
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::renderer::{
    BrowserCookie, CapturedResponse, Locator, NavigationResult, PageSnapshot, RenderContext,
};

/// Response URL used by [`Effect::respond`].
pub const EXPORT_RESPONSE_URL: &str = "https://src.test/api/export/download.csv";

/// Bytes produced by an effect, fixed or derived from the current URL.
#[derive(Clone)]
pub enum Payload {
    Bytes(Vec<u8>),
    PerUrl(Arc<dyn Fn(&str) -> Vec<u8> + Send + Sync>),
}

impl Payload {
    fn render(&self, url: &str) -> Vec<u8> {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::PerUrl(f) => f(url),
        }
    }
}

/// What happens when a rule fires.
#[derive(Clone, Default)]
pub struct Effect {
    show: Vec<Locator>,
    hide: Vec<Locator>,
    clear: bool,
    download: Option<Payload>,
    response: Option<(u16, Payload)>,
    once: bool,
}

impl Effect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(mut self, locator: Locator) -> Self {
        self.show.push(locator);
        self
    }

    pub fn hide(mut self, locator: Locator) -> Self {
        self.hide.push(locator);
        self
    }

    /// Hide everything before applying `show`.
    pub fn replace_page(mut self) -> Self {
        self.clear = true;
        self
    }

    /// Save a file into the armed download directory.
    pub fn download(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.download = Some(Payload::Bytes(bytes.into()));
        self
    }

    pub fn download_with(mut self, f: impl Fn(&str) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.download = Some(Payload::PerUrl(Arc::new(f)));
        self
    }

    /// Produce a 200 response at [`EXPORT_RESPONSE_URL`] for an armed capture.
    pub fn respond(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.respond_status(200, bytes)
    }

    pub fn respond_status(mut self, status: u16, bytes: impl Into<Vec<u8>>) -> Self {
        self.response = Some((status, Payload::Bytes(bytes.into())));
        self
    }

    pub fn respond_with(mut self, f: impl Fn(&str) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.response = Some((200, Payload::PerUrl(Arc::new(f))));
        self
    }

    /// Fire at most once.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

enum Trigger {
    Click(Locator),
    /// Substring of the navigated URL.
    Navigate(String),
}

struct Rule {
    trigger: Trigger,
    effect: Effect,
    spent: bool,
}

#[derive(Default)]
struct ScriptState {
    visible: HashSet<Locator>,
    rules: Vec<Rule>,
    links: HashMap<Locator, String>,
    cookies: Vec<BrowserCookie>,
    url: String,
    nav_failures: u32,
    navigations: Vec<String>,
    clicks: Vec<Locator>,
    filled: Vec<(Locator, String)>,
    download_dir: Option<PathBuf>,
    pending_download: Option<PathBuf>,
    downloads_written: usize,
    capture_pattern: Option<Regex>,
    pending_response: Option<CapturedResponse>,
}

impl ScriptState {
    fn fire(&mut self, matches: impl Fn(&Trigger) -> bool) {
        let url = self.url.clone();
        let mut effects = Vec::new();
        for rule in self.rules.iter_mut() {
            if rule.spent || !matches(&rule.trigger) {
                continue;
            }
            if rule.effect.once {
                rule.spent = true;
            }
            effects.push(rule.effect.clone());
        }
        for effect in effects {
            self.apply(&effect, &url);
        }
    }

    fn apply(&mut self, effect: &Effect, url: &str) {
        if effect.clear {
            self.visible.clear();
        }
        for locator in &effect.hide {
            self.visible.remove(locator);
        }
        for locator in &effect.show {
            self.visible.insert(locator.clone());
        }
        if let (Some(payload), Some(dir)) = (&effect.download, &self.download_dir) {
            self.downloads_written += 1;
            let path = dir.join(format!("download-{}", self.downloads_written));
            if std::fs::write(&path, payload.render(url)).is_ok() {
                self.pending_download = Some(path);
            }
        }
        if let (Some((status, payload)), Some(pattern)) = (&effect.response, &self.capture_pattern)
        {
            if pattern.is_match(EXPORT_RESPONSE_URL) {
                self.pending_response = Some(CapturedResponse {
                    url: EXPORT_RESPONSE_URL.to_string(),
                    status: *status,
                    body: payload.render(url),
                });
            }
        }
    }
}

/// Builder and inspection handle for a scripted browser.
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn visible(self, locator: Locator) -> Self {
        self.lock().visible.insert(locator);
        self
    }

    pub fn on_click(self, locator: Locator, effect: Effect) -> Self {
        self.lock().rules.push(Rule {
            trigger: Trigger::Click(locator),
            effect,
            spent: false,
        });
        self
    }

    pub fn on_navigate(self, url_contains: &str, effect: Effect) -> Self {
        self.lock().rules.push(Rule {
            trigger: Trigger::Navigate(url_contains.to_string()),
            effect,
            spent: false,
        });
        self
    }

    pub fn cookie(self, name: &str, value: &str) -> Self {
        self.lock().cookies.push(BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: "src.test".to_string(),
        });
        self
    }

    /// Link target reported for `locator`.
    pub fn link(self, locator: Locator, url: &str) -> Self {
        self.lock().links.insert(locator, url.to_string());
        self
    }

    /// Fail the next `n` navigations.
    pub fn fail_navigations(self, n: u32) -> Self {
        self.lock().nav_failures = n;
        self
    }

    pub fn show(&self, locator: Locator) {
        self.lock().visible.insert(locator);
    }

    pub fn hide(&self, locator: &Locator) {
        self.lock().visible.remove(locator);
    }

    /// A context driving this script. All contexts share state.
    pub fn context(&self) -> Box<dyn RenderContext> {
        Box::new(ScriptedContext {
            script: self.clone(),
        })
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.lock().clicks.clone()
    }

    pub fn filled(&self) -> Vec<(Locator, String)> {
        self.lock().filled.clone()
    }
}

struct ScriptedContext {
    script: Script,
}

impl ScriptedContext {
    fn require_visible(&self, locator: &Locator) -> Result<()> {
        if !self.script.lock().visible.contains(locator) {
            bail!("no visible element for {locator}");
        }
        Ok(())
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        let mut state = self.script.lock();
        state.navigations.push(url.to_string());
        if state.nav_failures > 0 {
            state.nav_failures -= 1;
            bail!("navigation failed: net::ERR_CONNECTION_RESET");
        }
        state.url = url.to_string();
        state.fire(|t| matches!(t, Trigger::Navigate(p) if url.contains(p.as_str())));
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.script.lock().url.clone())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.script.lock().cookies.clone())
    }

    async fn arm_download(&mut self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut state = self.script.lock();
        state.download_dir = Some(dir.to_path_buf());
        state.pending_download = None;
        Ok(())
    }

    async fn await_download(&mut self, timeout: Duration) -> Result<Option<PathBuf>> {
        let ready = self.script.lock().pending_download.take();
        if ready.is_some() {
            return Ok(ready);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.script.lock().pending_download.take())
    }

    async fn arm_response_capture(&mut self, pattern: &Regex) -> Result<()> {
        let mut state = self.script.lock();
        state.capture_pattern = Some(pattern.clone());
        state.pending_response = None;
        Ok(())
    }

    async fn await_captured_response(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CapturedResponse>> {
        let ready = self.script.lock().pending_response.take();
        if ready.is_some() {
            return Ok(ready);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.script.lock().pending_response.take())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        Ok(self.script.lock().visible.contains(locator))
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        self.require_visible(locator)?;
        let mut state = self.script.lock();
        state.clicks.push(locator.clone());
        state.fire(|t| matches!(t, Trigger::Click(l) if l == locator));
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        self.require_visible(locator)?;
        self.script
            .lock()
            .filled
            .push((locator.clone(), value.to_string()));
        Ok(())
    }

    async fn submit(&self, locator: &Locator) -> Result<()> {
        self.click(locator).await
    }

    async fn link_target(&self, locator: &Locator) -> Result<Option<String>> {
        Ok(self.script.lock().links.get(locator).cloned())
    }

    async fn user_agent(&self) -> Result<String> {
        Ok("ScriptedBrowser/1.0".to_string())
    }

    async fn snapshot(&self) -> PageSnapshot {
        let state = self.script.lock();
        let mut shown: Vec<String> = state.visible.iter().map(|l| l.to_string()).collect();
        shown.sort();
        PageSnapshot {
            url: state.url.clone(),
            title: "scripted".to_string(),
            excerpt: shown.join(", "),
        }
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Script")
            .field("url", &state.url)
            .field("visible", &state.visible.len())
            .field("rules", &state.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_click_rules_and_once() {
        let a = Locator::text("A");
        let b = Locator::css("#b");
        let script = Script::new()
            .visible(a.clone())
            .on_click(a.clone(), Effect::new().show(b.clone()).once());
        let ctx = script.context();

        ctx.click(&a).await.unwrap();
        assert!(ctx.is_visible(&b).await.unwrap());
        script.hide(&b);
        ctx.click(&a).await.unwrap();
        assert!(!ctx.is_visible(&b).await.unwrap());
        assert_eq!(script.clicks().len(), 2);
        assert!(ctx.click(&b).await.is_err());
    }

    #[tokio::test]
    async fn test_download_only_when_armed() {
        let dir = tempfile::tempdir().unwrap();
        let export = Locator::text("Export");
        let script = Script::new()
            .visible(export.clone())
            .on_click(export.clone(), Effect::new().download("a,b\n1,2\n"));
        let mut ctx = script.context();

        ctx.click(&export).await.unwrap();
        ctx.arm_download(dir.path()).await.unwrap();
        assert_eq!(
            ctx.await_download(Duration::from_millis(5)).await.unwrap(),
            None
        );

        ctx.arm_download(dir.path()).await.unwrap();
        ctx.click(&export).await.unwrap();
        let path = ctx
            .await_download(Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_navigation_failures_then_success() {
        let script = Script::new().fail_navigations(1);
        let mut ctx = script.context();
        assert!(ctx.navigate("https://src.test/a", 10).await.is_err());
        assert!(ctx.navigate("https://src.test/a", 10).await.is_ok());
        assert_eq!(ctx.get_url().await.unwrap(), "https://src.test/a");
        assert_eq!(script.navigations().len(), 2);
    }
}
