use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use regex::Regex;
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::{fs::File, io::AsyncWriteExt};

pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("playlist error: {0}")]
    PlaylistError(#[from] crate::playlist::PlaylistError),
}

impl HttpClient {
    pub fn new() -> reqwest::Result<HttpClient> {
        Self::with_cookies(CookieStore::default())
    }

    /// Builds a client whose requests carry (and update) the given cookies.
    pub fn with_cookies(store: CookieStore) -> reqwest::Result<HttpClient> {
        Self::build(reqwest::Client::builder(), store)
    }

    /// A client for servers on the loopback interface, ignoring any proxy
    /// configured in the environment.
    #[cfg(test)]
    pub(crate) fn local() -> HttpClient {
        Self::build(reqwest::Client::builder().no_proxy(), CookieStore::default())
            .expect("client builds")
    }

    fn build(builder: reqwest::ClientBuilder, store: CookieStore) -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::new(store));
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = builder.cookie_provider(cookies.clone()).build()?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient { client, cookies })
    }

    /// Streams `url` into `path`, going through `<path>.part` so an
    /// interrupted transfer never leaves a file at the final location.
    pub async fn download_file(&self, url: &str, path: &Path) -> Result<usize, DownloadError> {
        let temp_path = part_path(path);
        let result = async {
            let mut file = File::create(&temp_path).await?;
            let mut resp = self.client.get(url).send().await?.error_for_status()?;
            let mut size = 0;

            while let Some(chunk) = resp.chunk().await? {
                file.write_all(&chunk).await?;
                size += chunk.len();
            }

            file.flush().await?;
            Ok::<_, DownloadError>(size)
        }
        .await;

        match result {
            Ok(size) => {
                tokio::fs::rename(&temp_path, path).await?;
                Ok(size)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .map_err(|e| e.into())
    }
}

/// `<path>.part`, the staging location for atomic writes.
pub fn part_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

/// Writes `contents` to `path` through a `.part` file and renames it into
/// place once everything is on disk.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = part_path(path);
    let mut file = File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&temp_path, path).await
}

/// Replaces anything that is not a word character, `-`, `_`, `.`, space or a
/// bracket with `_`, then trims surrounding whitespace.
pub fn sanitize_filename(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^\w\-_\. \[\]\(\)]").expect("valid regex"));
    re.replace_all(name, "_").trim().to_string()
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "KiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "MiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "GiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "TiB";
    }

    format!("{:.2} {}", bytes, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize() {
        assert_eq!(
            sanitize_filename("歌枠 Singing / Stream [abc123]"),
            "歌枠 Singing _ Stream [abc123]"
        );
        assert_eq!(sanitize_filename("a:b*c?d"), "a_b_c_d");
        assert_eq!(sanitize_filename("  padded (1).  "), "padded (1).");
    }

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn part_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/video [x].ts")),
            PathBuf::from("/tmp/video [x].ts.part")
        );
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        write_atomic(&path, b"{}").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert!(!part_path(&path).exists());
    }
}
