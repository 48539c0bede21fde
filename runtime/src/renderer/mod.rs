// Copyright 2026 Landcomp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Renderer abstraction for browser-driven acquisition.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). Control
//! lookups, clicks and form fills default to injected JavaScript built in
//! [`dom`], so an engine only has to provide navigation, script evaluation,
//! cookies and the two payload observers (downloads and network responses).

pub mod chromium;
pub mod dom;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Describes how to find one control on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    /// A CSS selector.
    Css(String),
    /// A clickable element (button, link, `role=button`, submit input)
    /// whose visible text contains this string, case-insensitively.
    Text(String),
    /// Any element whose visible text contains this string. Used for page
    /// markers such as "Welcome back" rather than controls.
    Content(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self::Content(text.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css:{s}"),
            Self::Text(s) => write!(f, "text:{s}"),
            Self::Content(s) => write!(f, "content:{s}"),
        }
    }
}

/// A cookie from the browser's jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// A network response body observed while a capture was armed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

/// Diagnostic view of the page, attached to login failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Leading slice of the visible body text.
    pub excerpt: String,
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
///
/// Exactly one logical operation drives a context at a time; the pipeline
/// owns it and lends it out as `&mut dyn RenderContext`.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;

    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;

    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;

    /// Cookies visible to the current page.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

    /// Start listening for browser downloads saved into `dir`.
    async fn arm_download(&mut self, dir: &Path) -> Result<()>;

    /// Wait for the armed download to complete. `None` on timeout or cancel.
    async fn await_download(&mut self, timeout: Duration) -> Result<Option<PathBuf>>;

    /// Start observing network responses whose URL matches `pattern`.
    async fn arm_response_capture(&mut self, pattern: &Regex) -> Result<()>;

    /// Wait for the first matching response body. `None` on timeout.
    async fn await_captured_response(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CapturedResponse>>;

    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;

    /// Whether a visible element matches `locator` right now.
    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        let value = self.execute_js(&dom::visible_script(locator)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Click the first visible element matching `locator`.
    async fn click(&self, locator: &Locator) -> Result<()> {
        let value = self.execute_js(&dom::click_script(locator)).await?;
        if value.as_bool() != Some(true) {
            bail!("no visible element for {locator}");
        }
        Ok(())
    }

    /// Type `value` into the first visible input matching `locator`.
    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let result = self.execute_js(&dom::fill_script(locator, value)).await?;
        if result.as_bool() != Some(true) {
            bail!("no visible input for {locator}");
        }
        Ok(())
    }

    /// Submit the form enclosing the element matching `locator`.
    async fn submit(&self, locator: &Locator) -> Result<()> {
        let value = self.execute_js(&dom::submit_script(locator)).await?;
        if value.as_bool() != Some(true) {
            bail!("no form encloses {locator}");
        }
        Ok(())
    }

    /// The `href` (or `data-href`) of the element matching `locator`, resolved
    /// against the page URL.
    async fn link_target(&self, locator: &Locator) -> Result<Option<String>> {
        let value = self.execute_js(&dom::href_script(locator)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn user_agent(&self) -> Result<String> {
        let value = self.execute_js("navigator.userAgent").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Best-effort diagnostic snapshot; never fails.
    async fn snapshot(&self) -> PageSnapshot {
        match self.execute_js(dom::SNAPSHOT_SCRIPT).await {
            Ok(v) => serde_json::from_value(v).unwrap_or_default(),
            Err(e) => PageSnapshot {
                url: self.get_url().await.unwrap_or_default(),
                title: String::new(),
                excerpt: format!("snapshot unavailable: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_serializes_for_scripts() {
        let json = serde_json::to_value(Locator::css("input[type=email]")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"by": "css", "value": "input[type=email]"})
        );
        let json = serde_json::to_value(Locator::content("Welcome back")).unwrap();
        assert_eq!(json["by"], "content");
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::text("Continue").to_string(), "text:Continue");
    }
}
