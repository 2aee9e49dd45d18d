use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::Utc;
use regex::Regex;
use reqwest::Url;

use crate::{
    api::{Channel, Site, Video},
    error::Error,
    util,
};

#[derive(thiserror::Error, Debug)]
pub enum SidecarError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("could not serialize: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("{0}")]
    SiteError(#[from] Error),
    #[error("{0} not available for this video")]
    Unavailable(&'static str),
}

pub fn info_json_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.info.json", name))
}

pub fn live_chat_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.live_chat.json", name))
}

/// Writes the video's metadata as JSON.
pub async fn write_info_json(video: &Video, path: &Path) -> Result<(), SidecarError> {
    let json = serde_json::to_vec_pretty(video)?;
    util::write_atomic(path, &json).await?;
    Ok(())
}

/// Writes the channel's API document as JSON.
pub async fn write_channel_info_json(channel: &Channel, path: &Path) -> Result<(), SidecarError> {
    let json = serde_json::to_vec(&channel.details)?;
    util::write_atomic(path, &json).await?;
    Ok(())
}

/// Rewrites a resized thumbnail URL into the one for the full size image.
pub fn full_size_thumbnail(url: &str) -> String {
    static RESIZED: OnceLock<Regex> = OnceLock::new();
    let re = RESIZED.get_or_init(|| {
        Regex::new(r"\.w[0-9]+\.ttl[0-9]+\.(?P<ext>[a-z]{1,4})\?").expect("valid regex")
    });
    re.replace(url, ".${ext}?q=100&quality=100&").into_owned()
}

/// Image extension for a thumbnail URL: its `format` query parameter, else
/// the path's extension, else `jpg`.
pub fn thumbnail_extension(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "jpg".to_string();
    };

    if let Some((_, format)) = parsed.query_pairs().find(|(k, _)| k == "format") {
        if !format.is_empty() {
            return format.into_owned();
        }
    }

    Path::new(parsed.path())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("jpg")
        .to_string()
}

/// Downloads the full size version of the image at `url` to
/// `<dir>/<stem>.<ext>`.
pub async fn write_image(
    site: &dyn Site,
    url: &str,
    dir: &Path,
    stem: &str,
) -> Result<PathBuf, SidecarError> {
    let url = full_size_thumbnail(url);
    let path = dir.join(format!("{}.{}", stem, thumbnail_extension(&url)));

    site.download(&url, &path).await?;
    Ok(path)
}

/// Downloads the full size thumbnail to `<dir>/<name>.<ext>`.
pub async fn write_thumbnail(
    site: &dyn Site,
    video: &Video,
    dir: &Path,
    name: &str,
) -> Result<PathBuf, SidecarError> {
    let url = video
        .thumbnail_url
        .as_deref()
        .ok_or(SidecarError::Unavailable("thumbnail"))?;
    write_image(site, url, dir, name).await
}

/// Downloads the channel's icon and cover to `<name>-icon.<ext>` and
/// `<name>-cover.<ext>`. Each image succeeds or fails on its own.
pub async fn write_channel_images(
    site: &dyn Site,
    channel: &Channel,
    dir: &Path,
    name: &str,
) -> Vec<(&'static str, Result<PathBuf, SidecarError>)> {
    let mut written = Vec::new();
    for (kind, url) in [
        ("icon", &channel.icon_image_url),
        ("cover", &channel.cover_image_url),
    ] {
        let result = match url {
            Some(url) => write_image(site, url, dir, &format!("{}-{}", name, kind)).await,
            None => Err(SidecarError::Unavailable(kind)),
        };
        written.push((kind, result));
    }
    written
}

/// Pages through the chat replay from the start of the stream and writes one
/// JSON event per line, oldest first. Returns the number of events written.
pub async fn write_live_chat(
    site: &dyn Site,
    video: &Video,
    path: &Path,
) -> Result<usize, SidecarError> {
    let started_at = match (video.chat_available, video.started_at) {
        (true, Some(t)) => t.with_timezone(&Utc),
        _ => return Err(SidecarError::Unavailable("live chat")),
    };

    let mut cursor = started_at;
    let mut previous_ids: HashSet<String> = HashSet::new();
    let mut out = String::new();
    let mut count = 0;

    loop {
        let page = match site.chat_page(&video.id, cursor).await {
            Ok(page) => page,
            // Keep what we have if the API gives up halfway through
            Err(e) if count > 0 => {
                warn!("[live-chat:{}] stopped early: {}", video.id, e);
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let Some(last) = page.last() else {
            break;
        };
        let last_time = last.posted_at.with_timezone(&Utc);

        // A page starts at the cursor, so it repeats the tail of the last one
        let mut page_ids = HashSet::new();
        for event in &page {
            if !event.id.is_empty() {
                if previous_ids.contains(&event.id) {
                    continue;
                }
                page_ids.insert(event.id.clone());
            }
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
            count += 1;
        }
        previous_ids = page_ids;

        if last_time <= cursor {
            break;
        }
        cursor = last_time;
    }

    util::write_atomic(path, out.as_bytes()).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration};

    use super::*;
    use crate::fake::{self, FakeSite};

    #[test]
    fn full_size() {
        assert_eq!(
            full_size_thumbnail(
                "https://hayabusa.io/openrec-image/thumbnails/abc.w320.ttl604800.jpeg?format=jpeg"
            ),
            "https://hayabusa.io/openrec-image/thumbnails/abc.jpeg?q=100&quality=100&format=jpeg"
        );
        assert_eq!(
            full_size_thumbnail("https://example.net/plain.png"),
            "https://example.net/plain.png"
        );
    }

    #[test]
    fn extension() {
        assert_eq!(
            thumbnail_extension("https://example.net/abc.jpeg?q=100&format=webp"),
            "webp"
        );
        assert_eq!(thumbnail_extension("https://example.net/abc.png"), "png");
        assert_eq!(thumbnail_extension("https://example.net/abc"), "jpg");
        assert_eq!(thumbnail_extension("not a url"), "jpg");
    }

    #[tokio::test]
    async fn info_json_mirrors_video() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake::video("abc", "A title");
        let path = info_json_path(dir.path(), "A title [abc]");

        write_info_json(&video, &path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["id"], "abc");
        assert_eq!(written["title"], "A title");
        assert_eq!(written["formats"][1]["name"], "Source");
        assert_eq!(written["chat_available"], true);
    }

    #[tokio::test]
    async fn thumbnail_goes_through_site() {
        let dir = tempfile::tempdir().unwrap();
        let site = FakeSite::default();
        let video = fake::video("abc", "t");

        let path = write_thumbnail(&site, &video, dir.path(), "t [abc]")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("t [abc].jpeg"));
        assert!(path.exists());
        assert_eq!(
            site.downloads.lock().unwrap().as_slice(),
            &["https://example.net/thumb.jpeg?q=100&quality=100&format=jpeg".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_thumbnail_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut video = fake::video("abc", "t");
        video.thumbnail_url = None;

        let result = write_thumbnail(&FakeSite::default(), &video, dir.path(), "t").await;
        assert!(matches!(result, Err(SidecarError::Unavailable(_))));
    }

    #[tokio::test]
    async fn chat_pages_in_order_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake::video("abc", "t");
        let start: DateTime<Utc> = video.started_at.unwrap().with_timezone(&Utc);

        let site = FakeSite {
            chat: vec![
                fake::chat("1", start),
                fake::chat("2", start + Duration::seconds(5)),
                fake::chat("3", start + Duration::seconds(10)),
                fake::chat("4", start + Duration::seconds(10)),
                fake::chat("5", start + Duration::seconds(20)),
            ],
            chat_page_size: 3,
            ..Default::default()
        };
        let path = live_chat_path(dir.path(), "t [abc]");

        let count = write_live_chat(&site, &video, &path).await.unwrap();

        let ids: Vec<String> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].to_string())
            .collect();
        assert_eq!(ids, vec!["\"1\"", "\"2\"", "\"3\"", "\"4\"", "\"5\""]);
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn chat_unavailable_without_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut video = fake::video("abc", "t");
        video.started_at = None;
        video.chat_available = false;

        let result =
            write_live_chat(&FakeSite::default(), &video, &dir.path().join("c.json")).await;
        assert!(matches!(result, Err(SidecarError::Unavailable(_))));
        assert!(!dir.path().join("c.json").exists());
    }

    #[tokio::test]
    async fn channel_images_are_full_size() {
        let dir = tempfile::tempdir().unwrap();
        let site = FakeSite::default();
        let mut channel = site_channel();
        channel.cover_image_url = None;

        let written = write_channel_images(&site, &channel, dir.path(), "Streamer [s]").await;

        assert_eq!(written[0].0, "icon");
        assert_eq!(
            written[0].1.as_ref().unwrap(),
            &dir.path().join("Streamer [s]-icon.png")
        );
        assert!(matches!(written[1].1, Err(SidecarError::Unavailable("cover"))));
        assert_eq!(
            site.downloads.lock().unwrap().as_slice(),
            &["https://example.net/icon.png?q=100&quality=100&format=png".to_string()]
        );
    }

    #[tokio::test]
    async fn channel_info_json_is_the_api_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = info_json_path(dir.path(), "Streamer [s]");

        write_channel_info_json(&site_channel(), &path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"id": "s", "name": "Streamer"}));
    }

    fn site_channel() -> Channel {
        Channel {
            id: "s".into(),
            name: "Streamer".into(),
            icon_image_url: Some("https://example.net/icon.w64.ttl604800.png?format=png".into()),
            cover_image_url: Some("https://example.net/cover.jpeg".into()),
            details: serde_json::json!({"id": "s", "name": "Streamer"}),
        }
    }
}
