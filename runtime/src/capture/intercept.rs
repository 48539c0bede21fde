use std::time::Duration;

use async_trait::async_trait;
use landcomp::CaptureMethod;
use regex::Regex;

use super::{trigger_export, CaptureError, CaptureJob, CaptureStrategy};
use crate::renderer::RenderContext;
use crate::session::ExportSelectors;

/// Observe the export endpoint's response and save its body, whether or
/// not the browser writes a file.
pub struct NetworkIntercept {
    selectors: ExportSelectors,
    pattern: Regex,
    timeout: Duration,
    poll: Duration,
}

impl NetworkIntercept {
    pub fn new(selectors: ExportSelectors, pattern: Regex, timeout: Duration, poll: Duration) -> Self {
        Self {
            selectors,
            pattern,
            timeout,
            poll,
        }
    }
}

#[async_trait]
impl CaptureStrategy for NetworkIntercept {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::NetworkInterception
    }

    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
    ) -> Result<u64, CaptureError> {
        // The observer must be in place before the request fires.
        ctx.arm_response_capture(&self.pattern)
            .await
            .map_err(CaptureError::browser)?;
        trigger_export(ctx, &self.selectors, self.poll).await?;

        let response = ctx
            .await_captured_response(self.timeout)
            .await
            .map_err(CaptureError::browser)?
            .ok_or(CaptureError::Timeout {
                what: "export response",
                after: self.timeout,
            })?;
        if !(200..300).contains(&response.status) {
            return Err(CaptureError::Http {
                status: response.status,
                url: response.url,
            });
        }
        tokio::fs::write(job.dest, &response.body).await?;
        tracing::debug!(url = %response.url, bytes = response.body.len(), "export response captured");
        Ok(response.body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Locator;
    use crate::testing::{Effect, Script};
    use landcomp::{PriceRange, Query, SizeRange};

    #[tokio::test]
    async fn test_error_status_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.csv");
        let export = Locator::text("Export");
        let script = Script::new()
            .visible(export.clone())
            .on_click(export, Effect::new().respond_status(403, "denied"));
        let mut ctx = script.context();
        let query = Query {
            location: "32541".into(),
            size_range: SizeRange::new("5+", 5.0, None, None),
            price_range: PriceRange::new("1m+", 1_000_000, None),
        };
        let job = CaptureJob {
            query: &query,
            search_url: "https://src.test/search",
            dest: &dest,
        };
        let strategy = NetworkIntercept::new(
            ExportSelectors::default().with_uniform_timeout(Duration::from_millis(5)),
            Regex::new("download").unwrap(),
            Duration::from_millis(20),
            Duration::from_millis(2),
        );

        let err = strategy.capture(ctx.as_mut(), &job).await.unwrap_err();
        assert!(matches!(err, CaptureError::Http { status: 403, .. }));
        assert!(!dest.exists());
    }
}
