//! Default fallback chains for the sign-in flow and the export page.
//!
//! Candidates are ordered from most to least specific. Early candidates get
//! the longest timeout since they are expected to match on a healthy page;
//! later ones are quick checks.

use std::time::Duration;

use super::probe::{with_timeout, Candidate};
use crate::renderer::Locator;

fn css(selector: &str, timeout_ms: u64) -> Candidate {
    Candidate::new(Locator::css(selector), timeout_ms)
}

fn text(label: &str, timeout_ms: u64) -> Candidate {
    Candidate::new(Locator::text(label), timeout_ms)
}

fn content(marker: &str, timeout_ms: u64) -> Candidate {
    Candidate::new(Locator::content(marker), timeout_ms)
}

/// Chains for every state of the login flow.
#[derive(Debug, Clone)]
pub struct LoginSelectors {
    /// Paywall or "sign in to see" prompt that opens the login dialog.
    pub unlock_prompt: Vec<Candidate>,
    pub email_input: Vec<Candidate>,
    /// Control that advances from the email step.
    pub email_continue: Vec<Candidate>,
    /// "Welcome back" marker shown for recognised accounts.
    pub welcome_back: Vec<Candidate>,
    /// Control that dismisses the welcome-back interstitial.
    pub welcome_continue: Vec<Candidate>,
    /// Marker that the account was created through a third-party identity.
    pub third_party_marker: Vec<Candidate>,
    /// "Use your password instead" escape from the third-party redirect.
    pub use_credentials: Vec<Candidate>,
    pub password_input: Vec<Candidate>,
    pub submit: Vec<Candidate>,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            unlock_prompt: vec![
                css("[data-testid='unlock-sold-data']", 3_000),
                text("Sign in to see", 1_000),
                text("Unlock", 1_000),
                text("Join or sign in", 1_000),
                text("Log in", 500),
            ],
            email_input: vec![
                css("input[type='email']", 8_000),
                css("input[name='emailInput']", 2_000),
                css("input[name='email']", 2_000),
                css("input[autocomplete='username']", 1_000),
            ],
            email_continue: vec![
                css("button[data-testid='email-continue']", 2_000),
                text("Continue with email", 1_000),
                text("Continue", 1_000),
                text("Next", 500),
            ],
            welcome_back: vec![
                content("Welcome back", 3_000),
                content("Good to see you again", 500),
            ],
            welcome_continue: vec![text("Continue", 2_000), text("Sign in", 1_000)],
            third_party_marker: vec![
                content("signed up with Google", 2_000),
                content("signed up with Facebook", 500),
                content("signed up with Apple", 500),
                text("Continue with Google", 500),
            ],
            use_credentials: vec![
                text("Sign in with email instead", 3_000),
                text("Use password instead", 2_000),
                text("Use your password", 1_000),
                text("Use email and password", 1_000),
            ],
            password_input: vec![
                css("input[type='password']", 8_000),
                css("input[name='passwordInput']", 2_000),
                css("input[name='password']", 2_000),
                css("input[autocomplete='current-password']", 1_000),
            ],
            submit: vec![
                css("button[type='submit']", 2_000),
                text("Sign in", 1_000),
                text("Log in", 1_000),
                text("Continue", 500),
            ],
        }
    }
}

impl LoginSelectors {
    /// Same locators with every timeout replaced.
    pub fn with_uniform_timeout(&self, timeout: Duration) -> Self {
        Self {
            unlock_prompt: with_timeout(&self.unlock_prompt, timeout),
            email_input: with_timeout(&self.email_input, timeout),
            email_continue: with_timeout(&self.email_continue, timeout),
            welcome_back: with_timeout(&self.welcome_back, timeout),
            welcome_continue: with_timeout(&self.welcome_continue, timeout),
            third_party_marker: with_timeout(&self.third_party_marker, timeout),
            use_credentials: with_timeout(&self.use_credentials, timeout),
            password_input: with_timeout(&self.password_input, timeout),
            submit: with_timeout(&self.submit, timeout),
        }
    }

    /// Controls whose presence means the page wants a sign-in.
    pub fn auth_surface(&self) -> Vec<Candidate> {
        self.unlock_prompt
            .iter()
            .take(1)
            .chain(self.email_input.iter())
            .chain(self.password_input.iter())
            .cloned()
            .collect()
    }
}

/// Chains for the search results page.
#[derive(Debug, Clone)]
pub struct ExportSelectors {
    /// The control that triggers the CSV export.
    pub export_control: Vec<Candidate>,
    /// Markers of an empty result set.
    pub no_results: Vec<Candidate>,
}

impl Default for ExportSelectors {
    fn default() -> Self {
        Self {
            export_control: vec![
                css("a#download-and-save", 8_000),
                css("a[href*='download'][href*='csv']", 2_000),
                css("[data-testid='download-csv']", 2_000),
                text("Download All", 1_000),
                text("Download CSV", 1_000),
                text("Export", 500),
            ],
            no_results: vec![
                content("No results", 500),
                content("0 homes", 500),
                content("No matching homes", 500),
            ],
        }
    }
}

impl ExportSelectors {
    pub fn with_uniform_timeout(&self, timeout: Duration) -> Self {
        Self {
            export_control: with_timeout(&self.export_control, timeout),
            no_results: with_timeout(&self.no_results, timeout),
        }
    }
}
