use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use landcomp::CaptureMethod;

use super::{move_file, trigger_export, CaptureError, CaptureJob, CaptureStrategy};
use crate::renderer::RenderContext;
use crate::session::ExportSelectors;

/// Click the export control and wait for the browser's own download.
pub struct NativeDownload {
    selectors: ExportSelectors,
    /// Directory the browser saves into before the file is moved to its
    /// final name.
    staging: PathBuf,
    timeout: Duration,
    poll: Duration,
}

impl NativeDownload {
    pub fn new(selectors: ExportSelectors, staging: PathBuf, timeout: Duration, poll: Duration) -> Self {
        Self {
            selectors,
            staging,
            timeout,
            poll,
        }
    }
}

#[async_trait]
impl CaptureStrategy for NativeDownload {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::NativeDownload
    }

    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
    ) -> Result<u64, CaptureError> {
        // Leftovers from an earlier timed-out download must not be mistaken
        // for this query's export.
        clear_staging(&self.staging).await;
        ctx.arm_download(&self.staging)
            .await
            .map_err(CaptureError::browser)?;
        trigger_export(ctx, &self.selectors, self.poll).await?;

        let saved = match ctx
            .await_download(self.timeout)
            .await
            .map_err(CaptureError::browser)?
        {
            Some(saved) => saved,
            None => {
                clear_staging(&self.staging).await;
                return Err(CaptureError::Timeout {
                    what: "native download",
                    after: self.timeout,
                });
            }
        };
        let bytes = move_file(&saved, job.dest).await?;
        tracing::debug!(from = %saved.display(), to = %job.dest.display(), bytes, "download saved");
        Ok(bytes)
    }
}

/// Remove every file in the staging directory. Missing directory is fine.
async fn clear_staging(dir: &Path) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale download"),
            Err(e) => tracing::debug!(path = %path.display(), "could not remove stale download: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Locator;
    use crate::testing::{Effect, Script};
    use landcomp::{PriceRange, Query, SizeRange};

    const CSV: &str = "ADDRESS,PRICE,LOT SIZE,ZIP\n1 Main St,100000,10000,32541\n";

    fn query() -> Query {
        Query {
            location: "32541".into(),
            size_range: SizeRange::new("1-3", 1.0, Some(3.0), None),
            price_range: PriceRange::new("0-50k", 0, Some(50_000)),
        }
    }

    fn strategy(staging: &Path) -> NativeDownload {
        NativeDownload::new(
            ExportSelectors::default().with_uniform_timeout(Duration::from_millis(10)),
            staging.to_path_buf(),
            Duration::from_millis(20),
            Duration::from_millis(2),
        )
    }

    fn export() -> Locator {
        Locator::css("a#download-and-save")
    }

    #[tokio::test]
    async fn test_download_moves_to_destination_and_clears_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("late.csv.crdownload"), "stale").unwrap();
        let dest = dir.path().join("out.csv");
        let script = Script::new()
            .visible(export())
            .on_click(export(), Effect::new().download(CSV));
        let mut ctx = script.context();
        let q = query();
        let job = CaptureJob {
            query: &q,
            search_url: "https://src.test/search",
            dest: &dest,
        };

        let bytes = strategy(&staging).capture(ctx.as_mut(), &job).await.unwrap();
        assert_eq!(bytes, CSV.len() as u64);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), CSV);
        assert!(!staging.join("late.csv.crdownload").exists());
    }

    #[tokio::test]
    async fn test_timeout_leaves_staging_empty() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("partial.crdownload"), "x").unwrap();
        let dest = dir.path().join("out.csv");
        let script = Script::new().visible(export());
        let mut ctx = script.context();
        let q = query();
        let job = CaptureJob {
            query: &q,
            search_url: "https://src.test/search",
            dest: &dest,
        };

        let err = strategy(&staging)
            .capture(ctx.as_mut(), &job)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Timeout {
                what: "native download",
                ..
            }
        ));
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
        assert!(!dest.exists());
    }
}
