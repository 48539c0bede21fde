//! Login state machine.
//!
//! ```text
//! Anonymous -> UnlockPrompt? -> EmailEntry -> WelcomeBackCheck?
//!     -> ThirdPartyRedirectRecovery? -> [WelcomeBackCheck?] -> PasswordEntry
//!     -> Submitted -> Authenticated | Failed
//! ```
//!
//! Optional states probe for their controls and fall through to the next
//! state when none appear. Required states fail the flow with a
//! [`LoginFailure`] carrying the stage and a page snapshot.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::probe::{any_visible, probe_chain, Candidate};
use super::selectors::LoginSelectors;
use crate::config::Credentials;
use crate::renderer::{Locator, PageSnapshot, RenderContext};

/// Upper bound on transitions; the flow is acyclic apart from the single
/// repeated welcome-back check.
const MAX_STEPS: usize = 16;

/// The welcome-back interstitial may appear before and after the
/// third-party recovery click.
const MAX_WELCOME_CHECKS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Anonymous,
    UnlockPrompt,
    EmailEntry,
    WelcomeBackCheck,
    ThirdPartyRedirectRecovery,
    PasswordEntry,
    Submitted,
    Authenticated,
    Failed,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::UnlockPrompt => "unlock_prompt",
            Self::EmailEntry => "email_entry",
            Self::WelcomeBackCheck => "welcome_back_check",
            Self::ThirdPartyRedirectRecovery => "third_party_redirect_recovery",
            Self::PasswordEntry => "password_entry",
            Self::Submitted => "submitted",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        }
    }

    /// States that may be absent from a given session.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Self::UnlockPrompt | Self::WelcomeBackCheck | Self::ThirdPartyRedirectRecovery
        )
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured login failure. Returned, never panicked.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("login failed at {stage}: {reason}")]
pub struct LoginFailure {
    pub stage: LoginState,
    pub reason: String,
    pub snapshot: PageSnapshot,
}

/// States visited on a successful login, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginReport {
    pub visited: Vec<LoginState>,
}

/// Per-attempt bookkeeping for the branches that can repeat.
#[derive(Debug, Default)]
struct Flow {
    welcome_checks: u8,
    recovery_done: bool,
    password_field: Option<Locator>,
}

/// Drives the sign-in flow on a browser context.
///
/// Credentials are supplied at construction and never read from the
/// environment here.
pub struct SessionManager {
    credentials: Credentials,
    login_url: String,
    selectors: LoginSelectors,
    nav_timeout_ms: u64,
    poll: Duration,
    settle: Duration,
}

impl SessionManager {
    pub fn new(credentials: Credentials, login_url: impl Into<String>) -> Self {
        Self {
            credentials,
            login_url: login_url.into(),
            selectors: LoginSelectors::default(),
            nav_timeout_ms: 30_000,
            poll: Duration::from_millis(250),
            settle: Duration::from_secs(8),
        }
    }

    pub fn with_selectors(mut self, selectors: LoginSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Navigation timeout, probe poll interval, and how long to wait for
    /// the password field to disappear after submitting.
    pub fn with_timing(mut self, nav_timeout_ms: u64, poll: Duration, settle: Duration) -> Self {
        self.nav_timeout_ms = nav_timeout_ms;
        self.poll = poll;
        self.settle = settle;
        self
    }

    pub fn selectors(&self) -> &LoginSelectors {
        &self.selectors
    }

    /// Quick check for any sign-in control on the current page.
    pub async fn needs_login(&self, ctx: &dyn RenderContext) -> bool {
        any_visible(ctx, &self.selectors.auth_surface()).await
    }

    /// Run the flow to a terminal state.
    pub async fn login(&self, ctx: &mut dyn RenderContext) -> Result<LoginReport, LoginFailure> {
        let mut flow = Flow::default();
        let mut visited = Vec::new();
        let mut state = LoginState::Anonymous;

        for _ in 0..MAX_STEPS {
            visited.push(state);
            let next = match self.step(state, ctx, &mut flow).await {
                Ok(next) => next,
                Err(reason) => return Err(self.fail(ctx, state, reason).await),
            };
            tracing::debug!(from = %state, to = %next, "login transition");
            match next {
                LoginState::Authenticated => {
                    visited.push(next);
                    tracing::info!(steps = visited.len(), "login succeeded");
                    return Ok(LoginReport { visited });
                }
                LoginState::Failed => {
                    return Err(self
                        .fail(ctx, state, "flow reached failed state".to_string())
                        .await)
                }
                _ => state = next,
            }
        }
        Err(self
            .fail(ctx, state, format!("no terminal state after {MAX_STEPS} steps"))
            .await)
    }

    async fn fail(&self, ctx: &dyn RenderContext, stage: LoginState, reason: String) -> LoginFailure {
        let snapshot = ctx.snapshot().await;
        tracing::warn!(stage = %stage, url = %snapshot.url, "login failed: {reason}");
        LoginFailure {
            stage,
            reason,
            snapshot,
        }
    }

    /// Perform one state's work and pick its successor. `Err` carries the
    /// failure reason for a required state.
    async fn step(
        &self,
        state: LoginState,
        ctx: &mut dyn RenderContext,
        flow: &mut Flow,
    ) -> Result<LoginState, String> {
        let sel = &self.selectors;
        match state {
            LoginState::Anonymous => {
                if !self.login_url.is_empty() {
                    ctx.navigate(&self.login_url, self.nav_timeout_ms)
                        .await
                        .map_err(|e| format!("could not open login page: {e:#}"))?;
                }
                Ok(LoginState::UnlockPrompt)
            }

            LoginState::UnlockPrompt => {
                if let Some(prompt) = self.probe(ctx, &sel.unlock_prompt).await {
                    click(ctx, &prompt).await?;
                }
                Ok(LoginState::EmailEntry)
            }

            LoginState::EmailEntry => {
                let input = self
                    .probe(ctx, &sel.email_input)
                    .await
                    .ok_or("no email input found")?;
                ctx.fill(&input, &self.credentials.account)
                    .await
                    .map_err(|e| format!("could not enter account: {e:#}"))?;
                match self.probe(ctx, &sel.email_continue).await {
                    Some(next) => click(ctx, &next).await?,
                    None => ctx
                        .submit(&input)
                        .await
                        .map_err(|e| format!("could not advance past email: {e:#}"))?,
                }
                Ok(LoginState::WelcomeBackCheck)
            }

            LoginState::WelcomeBackCheck => {
                flow.welcome_checks += 1;
                if self.probe(ctx, &sel.welcome_back).await.is_some() {
                    if let Some(cont) = self.probe(ctx, &sel.welcome_continue).await {
                        // The password field may already be on screen under
                        // the marker; only click through when it is not.
                        if !any_visible(ctx, &sel.password_input).await {
                            click(ctx, &cont).await?;
                        }
                    }
                }
                if flow.recovery_done {
                    Ok(LoginState::PasswordEntry)
                } else {
                    Ok(LoginState::ThirdPartyRedirectRecovery)
                }
            }

            LoginState::ThirdPartyRedirectRecovery => {
                flow.recovery_done = true;
                if self.probe(ctx, &sel.third_party_marker).await.is_none() {
                    return Ok(LoginState::PasswordEntry);
                }
                let escape = self
                    .probe(ctx, &sel.use_credentials)
                    .await
                    .ok_or("third-party account but no password option found")?;
                click(ctx, &escape).await?;
                if flow.welcome_checks < MAX_WELCOME_CHECKS {
                    Ok(LoginState::WelcomeBackCheck)
                } else {
                    Ok(LoginState::PasswordEntry)
                }
            }

            LoginState::PasswordEntry => {
                let input = self
                    .probe(ctx, &sel.password_input)
                    .await
                    .ok_or("no password input found")?;
                ctx.fill(&input, &self.credentials.secret)
                    .await
                    .map_err(|e| format!("could not enter secret: {e:#}"))?;
                flow.password_field = Some(input);
                Ok(LoginState::Submitted)
            }

            LoginState::Submitted => {
                match self.probe(ctx, &sel.submit).await {
                    Some(button) => click(ctx, &button).await?,
                    None => {
                        let field = flow
                            .password_field
                            .as_ref()
                            .ok_or("submit reached without a password field")?;
                        ctx.submit(field)
                            .await
                            .map_err(|e| format!("no submit control: {e:#}"))?;
                    }
                }
                if self.password_cleared(ctx).await {
                    Ok(LoginState::Authenticated)
                } else {
                    Err("password field still present after submit".to_string())
                }
            }

            LoginState::Authenticated | LoginState::Failed => Ok(state),
        }
    }

    async fn probe(&self, ctx: &dyn RenderContext, chain: &[Candidate]) -> Option<Locator> {
        probe_chain(ctx, chain, self.poll).await
    }

    /// Wait up to the settle time for every password control to disappear.
    async fn password_cleared(&self, ctx: &dyn RenderContext) -> bool {
        let deadline = Instant::now() + self.settle;
        loop {
            if !any_visible(ctx, &self.selectors.password_input).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

async fn click(ctx: &dyn RenderContext, locator: &Locator) -> Result<(), String> {
    ctx.click(locator)
        .await
        .map_err(|e| format!("click on {locator} failed: {e:#}"))
}
