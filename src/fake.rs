use std::{
    collections::HashMap,
    path::Path,
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Url;

use crate::{
    api::{Channel, ChatEvent, Site, Video},
    downloader::Fetch,
    error::Error,
    ffmpeg::{ConversionError, Converter},
    playlist::Format,
    util::DownloadError,
};

pub fn format(name: &str, bandwidth: u64, is_source: bool) -> Format {
    Format {
        name: name.to_string(),
        group_id: format!("chunklist_{}", name.to_lowercase()),
        resolution: None,
        frame_rate: None,
        bandwidth,
        codecs: None,
        is_source,
        stream_url: format!("https://cdn.example.net/{}/chunklist.m3u8", name),
    }
}

pub fn video(id: &str, title: &str) -> Video {
    Video {
        id: id.to_string(),
        title: title.to_string(),
        started_at: DateTime::parse_from_rfc3339("2021-07-08T20:00:00+09:00").ok(),
        thumbnail_url: Some("https://example.net/thumb.w320.ttl604800.jpeg?format=jpeg".into()),
        chat_available: true,
        formats: vec![format("720p", 2000, false), format("Source", 5000, true)],
        details: serde_json::json!({ "id": id, "title": title }),
    }
}

/// Serves the router built by `app` on a loopback port. `app` gets the
/// server's base URL so responses can point back at it.
pub async fn serve(app: impl FnOnce(Url) -> axum::Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
    let router = app(base.clone());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    base
}

pub fn chat(id: &str, posted_at: DateTime<Utc>) -> ChatEvent {
    let jst = FixedOffset::east_opt(9 * 3600).unwrap();
    let mut extra = serde_json::Map::new();
    extra.insert("message".into(), format!("message {}", id).into());
    ChatEvent {
        id: id.to_string(),
        posted_at: posted_at.with_timezone(&jst),
        extra,
    }
}

#[derive(Default)]
pub struct FakeSite {
    pub videos: HashMap<String, Video>,
    pub channels: HashMap<String, Vec<String>>,
    pub chat: Vec<ChatEvent>,
    /// 0 returns the whole remaining chat in one page.
    pub chat_page_size: usize,
    pub resolved: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn with_videos(videos: impl IntoIterator<Item = Video>) -> Self {
        Self {
            videos: videos.into_iter().map(|v| (v.id.clone(), v)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Site for FakeSite {
    async fn resolve(&self, id: &str) -> Result<Video, Error> {
        self.resolved.lock().unwrap().push(id.to_string());
        self.videos
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("movie {}", id)))
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel, Error> {
        if !self.channels.contains_key(channel_id) {
            return Err(Error::NotFound(format!("channel {}", channel_id)));
        }
        Ok(Channel {
            id: channel_id.to_string(),
            name: "Streamer".to_string(),
            icon_image_url: Some(
                "https://example.net/icon.w64.ttl604800.png?format=png".to_string(),
            ),
            cover_image_url: Some(
                "https://example.net/cover.w1280.ttl604800.jpeg?format=jpeg".to_string(),
            ),
            details: serde_json::json!({ "id": channel_id, "name": "Streamer" }),
        })
    }

    async fn channel_movie_ids(&self, channel_id: &str) -> Result<Vec<String>, Error> {
        self.channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("channel {}", channel_id)))
    }

    async fn chat_page(&self, _id: &str, from: DateTime<Utc>) -> Result<Vec<ChatEvent>, Error> {
        let remaining = self.chat.iter().filter(|e| e.posted_at >= from).cloned();
        Ok(match self.chat_page_size {
            0 => remaining.collect(),
            n => remaining.take(n).collect(),
        })
    }

    async fn download(&self, url: &str, path: &Path) -> Result<u64, Error> {
        self.downloads.lock().unwrap().push(url.to_string());
        std::fs::write(path, b"image").map_err(DownloadError::from)?;
        Ok(5)
    }
}

#[derive(Default)]
pub struct FakeFetch {
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn fetch(&self, _label: &str, format: &Format, dest: &Path) -> Result<u64, DownloadError> {
        self.calls.lock().unwrap().push(format.name.clone());
        if self.fail {
            return Err(DownloadError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }
        std::fs::write(dest, b"mpeg-ts")?;
        Ok(7)
    }
}

#[derive(Default)]
pub struct FakeConverter {
    pub fail: bool,
    pub calls: Mutex<usize>,
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(ConversionError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "converter exited with 1",
            )));
        }
        std::fs::copy(input, output)?;
        Ok(())
    }
}
