//! Selector fallback chains.
//!
//! A chain is an ordered list of (locator, timeout) candidates. Each candidate
//! is polled until it becomes visible or its timeout runs out; the first
//! visible one wins.

use std::time::Duration;

use tokio::time::Instant;

use crate::renderer::{Locator, RenderContext};

/// One entry in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub locator: Locator,
    pub timeout: Duration,
}

impl Candidate {
    pub fn new(locator: Locator, timeout_ms: u64) -> Self {
        Self {
            locator,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Try each candidate in order; return the first that becomes visible.
///
/// Script errors while polling (e.g. the page is mid-navigation) count as
/// "not visible yet".
pub async fn probe_chain(
    ctx: &dyn RenderContext,
    chain: &[Candidate],
    poll: Duration,
) -> Option<Locator> {
    for candidate in chain {
        let deadline = Instant::now() + candidate.timeout;
        loop {
            match ctx.is_visible(&candidate.locator).await {
                Ok(true) => {
                    tracing::debug!(locator = %candidate.locator, "probe matched");
                    return Some(candidate.locator.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(locator = %candidate.locator, "probe error: {e:#}");
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(poll.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }
    None
}

/// Single immediate check across every candidate, without waiting.
pub async fn any_visible(ctx: &dyn RenderContext, chain: &[Candidate]) -> bool {
    for candidate in chain {
        if let Ok(true) = ctx.is_visible(&candidate.locator).await {
            return true;
        }
    }
    false
}

/// Replace every candidate's timeout.
pub fn with_timeout(chain: &[Candidate], timeout: Duration) -> Vec<Candidate> {
    chain
        .iter()
        .map(|c| Candidate {
            locator: c.locator.clone(),
            timeout,
        })
        .collect()
}
