use crate::error::FailureCause;
use crate::fetch::Fetcher;
use crate::types::{DownloadResult, DownloadStatus, DownloadSummary, LinkEntry, Pause};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

/// Fetches entries one at a time and streams each to disk.
pub struct Downloader<'a> {
    fetcher: &'a dyn Fetcher,
    rate_limit: Option<u64>,
    pause: Option<Pause>,
    show_progress: bool,
}

impl<'a> Downloader<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, rate_limit: Option<u64>, pause: Option<Pause>) -> Self {
        Self {
            fetcher,
            rate_limit,
            pause,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Downloads every entry into `dir`, in order. A failed entry is recorded
    /// and the loop moves on.
    pub async fn download_all(&self, entries: &[LinkEntry], dir: &Path) -> DownloadSummary {
        let start_time = Instant::now();
        let mut reports = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                if let Some(pause) = &self.pause {
                    sleep(pause.pick()).await;
                }
            }
            reports.push(self.download_file(entry, dir).await);
        }

        let summary = DownloadSummary::from_results(&reports, start_time.elapsed());
        info!(
            "Finished downloading {} of {} files into {}",
            summary.succeeded,
            summary.attempted,
            dir.display()
        );
        summary
    }

    async fn download_file(&self, entry: &LinkEntry, dir: &Path) -> DownloadResult {
        let output_path = dir.join(&entry.local_path);
        let pb = self.create_progress_bar(entry);
        info!("Starting download: {}", entry.url);

        let mut created = false;
        let result = self
            .stream_to_file(entry, &output_path, &pb, &mut created)
            .await;

        let status = match result {
            Ok(bytes) => {
                pb.finish();
                info!("Downloaded {} ({} bytes)", entry.local_path.display(), bytes);
                DownloadStatus::Success { bytes }
            }
            Err(cause) => {
                error!("Could not retrieve {} because of {}", entry.url, cause);
                pb.finish_with_message("Download failed");
                if created {
                    if let Err(e) = tokio::fs::remove_file(&output_path).await {
                        warn!("Could not remove partial file {}: {}", output_path.display(), e);
                    }
                }
                DownloadStatus::Failed(cause)
            }
        };

        DownloadResult {
            entry: entry.clone(),
            status,
        }
    }

    async fn stream_to_file(
        &self,
        entry: &LinkEntry,
        output_path: &Path,
        pb: &ProgressBar,
        created: &mut bool,
    ) -> Result<u64, FailureCause> {
        let mut body = self.fetcher.open(&entry.url).await?;
        pb.set_length(body.content_length.unwrap_or(0));

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(output_path).await?;
        *created = true;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = body.chunks.next().await {
            let chunk = chunk?;

            if let Some(rate_limit) = self.rate_limit.filter(|r| *r > 0) {
                let delay = Duration::from_secs_f64(chunk.len() as f64 / rate_limit as f64);
                sleep(delay).await;
            }

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        file.flush().await?;

        Ok(downloaded)
    }

    fn create_progress_bar(&self, entry: &LinkEntry) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(entry.local_path.display().to_string());
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::stub::StubFetcher;
    use tempfile::TempDir;
    use url::Url;

    fn entry(url: &str) -> LinkEntry {
        LinkEntry::new(Url::parse(url).unwrap(), None)
    }

    #[tokio::test]
    async fn failures_are_counted_and_do_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::new()
            .serve("https://x.gov/a.zip", "aaaa")
            .fail("https://x.gov/b.zip", FailureCause::Timeout)
            .serve("https://x.gov/c.pdf", "cc");
        let entries = vec![
            entry("https://x.gov/a.zip"),
            entry("https://x.gov/b.zip"),
            entry("https://x.gov/missing.csv"),
            entry("https://x.gov/c.pdf"),
        ];

        let summary = Downloader::new(&fetcher, None, None)
            .with_progress(false)
            .download_all(&entries, dir.path())
            .await;

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.bytes, 6);
        assert_eq!(summary.failures[0].target, "https://x.gov/b.zip");
        assert_eq!(summary.failures[0].cause, FailureCause::Timeout);
        assert_eq!(summary.failures[1].cause, FailureCause::HttpStatus(404));
        assert_eq!(std::fs::read(dir.path().join("a.zip")).unwrap(), b"aaaa");
        assert!(!dir.path().join("b.zip").exists());
        assert_eq!(
            fetcher.requests(),
            vec![
                "https://x.gov/a.zip",
                "https://x.gov/b.zip",
                "https://x.gov/missing.csv",
                "https://x.gov/c.pdf"
            ]
        );
    }

    #[tokio::test]
    async fn broken_transfer_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::new().break_after_first_chunk("https://x.gov/big.zip", "partial");
        let summary = Downloader::new(&fetcher, None, None)
            .with_progress(false)
            .download_all(&[entry("https://x.gov/big.zip")], dir.path())
            .await;

        assert_eq!(summary.succeeded, 0);
        assert!(matches!(summary.failures[0].cause, FailureCause::Body(_)));
        assert!(!dir.path().join("big.zip").exists());
    }

    #[tokio::test]
    async fn refused_request_keeps_file_from_earlier_run() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.zip"), b"earlier").unwrap();
        let fetcher = StubFetcher::new().fail(
            "https://x.gov/a.zip",
            FailureCause::Network("connection refused".into()),
        );

        let summary = Downloader::new(&fetcher, None, None)
            .with_progress(false)
            .download_all(&[entry("https://x.gov/a.zip")], dir.path())
            .await;

        assert_eq!(summary.succeeded, 0);
        assert_eq!(std::fs::read(dir.path().join("a.zip")).unwrap(), b"earlier");
    }

    #[tokio::test]
    async fn nested_local_paths_are_created() {
        let dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::new().serve("https://x.gov/AL/readme.pdf", "pdf");
        let mut e = entry("https://x.gov/AL/readme.pdf");
        e.local_path = "AL/readme.pdf".into();

        let summary = Downloader::new(&fetcher, Some(1_000_000), Some(Pause::fixed(Duration::ZERO)))
            .with_progress(false)
            .download_all(&[e], dir.path())
            .await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(std::fs::read(dir.path().join("AL/readme.pdf")).unwrap(), b"pdf");
    }
}
