use std::{path::Path, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use crate::{
    playlist::{self, Format, PlaylistError},
    stats::DownloadStatistics,
    util::{self, DownloadError, HttpClient},
};

/// Fetches a selected format to a local file.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Downloads `format` to `dest` and returns the number of bytes written.
    /// Nothing is left at `dest` unless the whole stream arrived.
    async fn fetch(&self, label: &str, format: &Format, dest: &Path) -> Result<u64, DownloadError>;
}

/// Downloads an HLS media playlist by concatenating its segments into a
/// single MPEG-TS file.
pub struct SegmentDownloader<'a> {
    client: &'a HttpClient,
    concurrency: usize,
}

impl<'a> SegmentDownloader<'a> {
    /// `concurrency` is the number of segment requests kept in flight.
    /// Segments are always written in playlist order.
    pub fn new(client: &'a HttpClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    async fn fetch_segment(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        // The middleware retries failed requests, but not a body that breaks
        // off halfway
        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(4);

        Retry::start(strategy, || async move {
            let result = async {
                let resp = self.client.client.get(url).send().await?.error_for_status()?;
                Ok::<_, DownloadError>(resp.bytes().await?.to_vec())
            }
            .await;
            if let Err(e) = &result {
                debug!("[download] segment {} failed: {}", url, e);
            }
            result
        })
        .await
    }

    async fn write_segments(
        &self,
        label: &str,
        segments: &[String],
        path: &Path,
    ) -> Result<u64, DownloadError> {
        let mut file = File::create(path).await?;
        let mut stats = DownloadStatistics::new(label, segments.len() as u64);

        let mut chunks = futures::stream::iter(segments.iter().cloned())
            .map(move |url| async move { self.fetch_segment(&url).await })
            .buffered(self.concurrency);

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            stats.add_segment(chunk.len() as u64);
            stats.print();
        }

        file.flush().await?;
        stats.finish();
        Ok(stats.bytes_downloaded)
    }
}

#[async_trait]
impl Fetch for SegmentDownloader<'_> {
    async fn fetch(&self, label: &str, format: &Format, dest: &Path) -> Result<u64, DownloadError> {
        let base = Url::parse(&format.stream_url)
            .map_err(|e| PlaylistError::Url(format!("{}: {}", format.stream_url, e)))?;
        let text = self.client.fetch_text(&format.stream_url).await?;
        let segments = playlist::parse_segments(&text, &base)?;
        debug!("[{}] {} segments in {}", label, segments.len(), format.stream_url);

        let temp_path = util::part_path(dest);
        match self.write_segments(label, &segments, &temp_path).await {
            Ok(size) => {
                tokio::fs::rename(&temp_path, dest).await?;
                Ok(size)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }
}
