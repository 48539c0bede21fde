use std::time::Duration;

use async_trait::async_trait;
use landcomp::partition::SearchTemplate;
use landcomp::CaptureMethod;
use url::Url;

use super::{locate_export, CaptureError, CaptureJob, CaptureStrategy};
use crate::http_client::{HttpClient, ReplayHeaders};
use crate::renderer::{BrowserCookie, RenderContext};
use crate::session::ExportSelectors;

/// Re-issue the export request over plain HTTP with the browser's cookies.
pub struct AuthenticatedReplay {
    selectors: ExportSelectors,
    http: HttpClient,
    /// Export endpoint template; falls back to the export control's link.
    export: Option<SearchTemplate>,
    csrf_header: String,
    poll: Duration,
}

impl AuthenticatedReplay {
    pub fn new(
        selectors: ExportSelectors,
        http: HttpClient,
        export: Option<SearchTemplate>,
        csrf_header: &str,
        poll: Duration,
    ) -> Self {
        Self {
            selectors,
            http,
            export,
            csrf_header: csrf_header.to_string(),
            poll,
        }
    }

    async fn export_url(
        &self,
        ctx: &dyn RenderContext,
        job: &CaptureJob<'_>,
    ) -> Result<Url, CaptureError> {
        let page = ctx
            .get_url()
            .await
            .ok()
            .and_then(|u| Url::parse(&u).ok())
            .or_else(|| Url::parse(job.search_url).ok());

        let raw = match &self.export {
            Some(template) => template.render(job.query),
            None => {
                let control = locate_export(ctx, &self.selectors, self.poll).await?;
                ctx.link_target(&control)
                    .await
                    .map_err(CaptureError::browser)?
                    .ok_or_else(|| {
                        CaptureError::Browser(format!("export control {control} has no link target"))
                    })?
            }
        };

        match Url::parse(&raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => page
                .and_then(|base| base.join(&raw).ok())
                .ok_or_else(|| CaptureError::Browser(format!("cannot resolve export URL {raw}"))),
            Err(e) => Err(CaptureError::Browser(format!("invalid export URL {raw}: {e}"))),
        }
    }

    fn headers(&self, cookies: &[BrowserCookie], user_agent: Option<String>, referer: String) -> ReplayHeaders {
        let cookie = (!cookies.is_empty()).then(|| {
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ")
        });
        let extra = csrf_token(cookies)
            .map(|token| vec![(self.csrf_header.clone(), token.to_string())])
            .unwrap_or_default();
        ReplayHeaders {
            cookie,
            user_agent,
            referer: Some(referer),
            extra,
        }
    }
}

/// Anti-forgery token from a cookie named like `csrf` or `xsrf`.
fn csrf_token(cookies: &[BrowserCookie]) -> Option<&str> {
    cookies
        .iter()
        .find(|c| {
            let name = c.name.to_ascii_lowercase();
            name.contains("csrf") || name.contains("xsrf")
        })
        .map(|c| c.value.as_str())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl CaptureStrategy for AuthenticatedReplay {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::AuthenticatedReplay
    }

    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
    ) -> Result<u64, CaptureError> {
        let url = self.export_url(ctx, job).await?;
        let cookies = ctx.cookies().await.map_err(CaptureError::browser)?;
        let user_agent = ctx.user_agent().await.ok().filter(|ua| !ua.is_empty());
        let referer = ctx
            .get_url()
            .await
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| job.search_url.to_string());

        let headers = self.headers(&cookies, user_agent, referer);
        tracing::debug!(url = %url, cookies = cookies.len(), csrf = !headers.extra.is_empty(), "replaying export");
        self.http.download(url.as_str(), &headers, job.dest).await
    }
}
