//! Chromium-based renderer using chromiumoxide.

use super::{BrowserCookie, CapturedResponse, NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, SetDownloadBehaviorBehavior,
    SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. LANDCOMP_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("LANDCOMP_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS locations
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch options for the browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Explicit executable; discovered with [`find_chromium`] when `None`.
    pub chromium_path: Option<PathBuf>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
        }
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let chrome_path = match &options.chromium_path {
            Some(p) => p.clone(),
            None => find_chromium()
                .context("Chromium not found. Set LANDCOMP_CHROMIUM_PATH or install Chrome.")?,
        };

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        builder = if options.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler error: {e}");
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            browser: Arc::clone(&self.browser),
            active_count: Arc::clone(&self.active_count),
            download: None,
            response: None,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser process exits when the last handle is dropped
        self.handler.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A spawned listener that resolves once with its result.
struct Watch<T> {
    rx: oneshot::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Watch<T> {
    async fn wait(self, timeout: Duration) -> Option<T> {
        let result = tokio::time::timeout(timeout, self.rx).await;
        self.task.abort();
        match result {
            Ok(Ok(value)) => Some(value),
            _ => None,
        }
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    browser: Arc<Browser>,
    active_count: Arc<AtomicUsize>,
    download: Option<Watch<Option<PathBuf>>>,
    response: Option<Watch<Result<CapturedResponse>>>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        // Scripts returning undefined carry no value
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .unwrap_or_default();
        Ok(url)
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
            })
            .collect())
    }

    async fn arm_download(&mut self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(dir.display().to_string())
            .events_enabled(true)
            .build()
            .map_err(|e| anyhow!("invalid download behavior: {e}"))?;
        self.browser
            .execute(params)
            .await
            .context("failed to set download behavior")?;

        let mut events = self
            .browser
            .event_listener::<EventDownloadProgress>()
            .await
            .context("failed to listen for downloads")?;
        let dir = dir.to_path_buf();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event.state {
                    DownloadProgressState::InProgress => continue,
                    DownloadProgressState::Completed => {
                        let path = event
                            .file_path
                            .clone()
                            .map(PathBuf::from)
                            .unwrap_or_else(|| dir.join(&event.guid));
                        let _ = tx.send(Some(path));
                        return;
                    }
                    DownloadProgressState::Canceled => {
                        let _ = tx.send(None);
                        return;
                    }
                }
            }
        });
        self.download = Some(Watch { rx, task });
        Ok(())
    }

    async fn await_download(&mut self, timeout: Duration) -> Result<Option<PathBuf>> {
        let watch = self.download.take().context("download listener not armed")?;
        Ok(watch.wait(timeout).await.flatten())
    }

    async fn arm_response_capture(&mut self, pattern: &Regex) -> Result<()> {
        self.page
            .execute(EnableParams::default())
            .await
            .context("failed to enable network domain")?;

        let mut received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to listen for responses")?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("failed to listen for loading events")?;

        let page = self.page.clone();
        let pattern = pattern.clone();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut matched = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = received.next() => {
                        if pattern.is_match(&event.response.url) {
                            matched.insert(
                                event.request_id.clone(),
                                (event.response.url.clone(), event.response.status as u16),
                            );
                        }
                    }
                    Some(event) = finished.next() => {
                        if let Some((url, status)) = matched.remove(&event.request_id) {
                            let body = read_body(&page, event.request_id.clone())
                                .await
                                .map(|body| CapturedResponse { url, status, body });
                            let _ = tx.send(body);
                            return;
                        }
                    }
                    else => return,
                }
            }
        });
        self.response = Some(Watch { rx, task });
        Ok(())
    }

    async fn await_captured_response(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CapturedResponse>> {
        let watch = self
            .response
            .take()
            .context("response capture not armed")?;
        watch.wait(timeout).await.transpose()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}

async fn read_body(
    page: &Page,
    request_id: chromiumoxide::cdp::browser_protocol::network::RequestId,
) -> Result<Vec<u8>> {
    let resp = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .context("failed to read response body")?;
    let body = &resp.result;
    if body.base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(body.body.as_bytes())
            .context("response body is not valid base64")
    } else {
        Ok(body.body.clone().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Locator;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_controls_and_cookies() {
        let renderer = ChromiumRenderer::launch(&BrowserOptions::default())
            .await
            .expect("failed to launch renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.navigate(
            "data:text/html,<form><input id='email'><button type='button'>Continue</button></form><p hidden>Secret</p>",
            10000,
        )
        .await
        .expect("navigation failed");

        assert!(ctx.is_visible(&Locator::css("#email")).await.unwrap());
        assert!(ctx.is_visible(&Locator::text("continue")).await.unwrap());
        assert!(!ctx.is_visible(&Locator::content("Secret")).await.unwrap());

        ctx.fill(&Locator::css("#email"), "agent@example.com")
            .await
            .expect("fill failed");
        let value = ctx
            .execute_js("document.querySelector('#email').value")
            .await
            .unwrap();
        assert_eq!(value.as_str(), Some("agent@example.com"));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);
        renderer.shutdown().await.expect("shutdown failed");
    }
}
