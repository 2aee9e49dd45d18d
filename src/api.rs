use std::{collections::HashSet, path::Path, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use reqwest::{header::CONTENT_TYPE, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_aux::prelude::*;

use crate::{
    auth::Session,
    error::Error,
    playlist::{self, Format},
    util::HttpClient,
};

pub const PUBLIC_API: &str = "https://public.openrec.tv/external/api/v5/";
pub const PRIVATE_API: &str = "https://apiv5.openrec.tv/api/v5/";
/// Page size of the `movies` listing; a shorter page is the last one.
pub const MOVIES_PAGE_SIZE: usize = 40;

/// A resolved movie: everything the rest of the pipeline needs.
#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub thumbnail_url: Option<String>,
    pub chat_available: bool,
    pub formats: Vec<Format>,
    /// The public API's movie document, minus advertising data.
    pub details: serde_json::Value,
}

/// One live chat message as served by the chat API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(default, deserialize_with = "deserialize_string_from_number")]
    pub id: String,
    pub posted_at: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A channel, as far as the sidecar writers are concerned.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub icon_image_url: Option<String>,
    pub cover_image_url: Option<String>,
    /// The most complete channel document the API would give.
    pub details: serde_json::Value,
}

/// Everything the pipeline asks of the site.
#[async_trait]
pub trait Site: Send + Sync {
    /// Fetches metadata and formats for a movie ID.
    async fn resolve(&self, id: &str) -> Result<Video, Error>;

    /// Fetches a channel's metadata, which also checks that it exists.
    async fn channel(&self, channel_id: &str) -> Result<Channel, Error>;

    /// IDs of every movie of a channel, in listing order.
    async fn channel_movie_ids(&self, channel_id: &str) -> Result<Vec<String>, Error>;

    /// Chat messages posted at or after `from`, oldest first.
    async fn chat_page(&self, id: &str, from: DateTime<Utc>) -> Result<Vec<ChatEvent>, Error>;

    /// Saves a file such as a thumbnail to `path`.
    async fn download(&self, url: &str, path: &Path) -> Result<u64, Error>;
}

/// Playlist URLs the API may return for a movie, in the order they are tried.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Media {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_public: Option<String>,
    #[serde(default)]
    pub url_source: Option<String>,
    #[serde(default)]
    pub url_high: Option<String>,
    #[serde(default)]
    pub url_medium: Option<String>,
    #[serde(default)]
    pub url_low_latency: Option<String>,
    #[serde(default)]
    pub url_audio: Option<String>,
}

impl Media {
    /// The first non-empty playlist URL.
    pub fn first_available(&self) -> Option<&str> {
        [
            &self.url,
            &self.url_public,
            &self.url_source,
            &self.url_high,
            &self.url_medium,
            &self.url_low_latency,
            &self.url_audio,
        ]
        .into_iter()
        .filter_map(|u| u.as_deref())
        .find(|u| !u.is_empty())
    }

    pub fn public(&self) -> Option<&str> {
        self.url_public.as_deref().filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct PublicMovie {
    id: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    title: String,
    #[serde(default)]
    started_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    media: Media,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    status: i64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MovieDetail {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<MovieDetailData>,
}

#[derive(Debug, Deserialize)]
struct MovieDetailData {
    #[serde(default)]
    items: Vec<MovieDetailItem>,
}

#[derive(Debug, Deserialize)]
struct MovieDetailItem {
    #[serde(default)]
    media: Media,
    views_limit: Option<ViewsLimit>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ViewsLimit {
    #[serde(default)]
    has_permission: bool,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    remain: i64,
}

#[derive(Debug, Deserialize)]
struct ViewsLimitResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<ViewsLimit>,
}

#[derive(Debug, Deserialize)]
struct ChannelMovie {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelDoc {
    id: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    name: String,
    #[serde(default)]
    icon_image_url: Option<String>,
    #[serde(default)]
    cover_image_url: Option<String>,
}

/// Formats a timestamp the way the chat API expects `from_created_at`.
pub fn chat_cursor(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Rejects bodies of the form `{"status": <0, "message": ...}`, which the API
/// sends with a 200 for missing or inaccessible movies.
fn check_body(body: &serde_json::Value, what: &str) -> Result<(), Error> {
    if body.get("status").is_none() {
        return Ok(());
    }
    match serde_json::from_value::<ApiStatus>(body.clone()) {
        Ok(s) if s.status < 0 || body.get("id").is_none() => Err(Error::NotFound(format!(
            "{} (API status {}: {})",
            what,
            s.status,
            s.message.unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}

/// The real site, talking to the public API and, with a session, the private
/// one.
pub struct OpenrecSite<'a> {
    client: &'a HttpClient,
    session: Option<&'a Session>,
    public_api: Url,
    private_api: Url,
    free_views: Mutex<Option<i64>>,
}

impl<'a> OpenrecSite<'a> {
    pub fn new(client: &'a HttpClient, session: Option<&'a Session>) -> Self {
        Self::with_endpoints(
            client,
            session,
            Url::parse(PUBLIC_API).expect("valid url"),
            Url::parse(PRIVATE_API).expect("valid url"),
        )
    }

    /// Talks to API roots other than the production ones. Both must end in `/`.
    pub fn with_endpoints(
        client: &'a HttpClient,
        session: Option<&'a Session>,
        public_api: Url,
        private_api: Url,
    ) -> Self {
        Self {
            client,
            session,
            public_api,
            private_api,
            free_views: Mutex::new(session.and_then(|s| s.daily_free_views_remaining)),
        }
    }

    /// Free views left today, as last reported by the private API.
    pub fn daily_free_views_remaining(&self) -> Option<i64> {
        *self.free_views.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The session this site was created with, updated with what the API
    /// has reported since.
    pub fn session(&self) -> Option<Session> {
        self.session.map(|s| Session {
            daily_free_views_remaining: self.daily_free_views_remaining(),
            ..s.clone()
        })
    }

    fn note_free_views(&self, remain: i64) {
        *self.free_views.lock().unwrap_or_else(|e| e.into_inner()) = Some(remain);
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url, Error> {
        base.join(path)
            .map_err(|e| Error::InvalidReference(format!("{}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        session: Option<&Session>,
        what: &str,
    ) -> Result<T, Error> {
        debug!("[api] GET {}", url);
        let mut req = self.client.client.get(url);
        if let Some(session) = session {
            req = req.headers(session.headers());
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Error::from_status(resp.status(), what));
        }
        Ok(resp.json().await?)
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, Error> {
        let url = Self::endpoint(&self.public_api, path)?;
        self.get_json(url, None, what).await
    }

    async fn get_private<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        what: &str,
    ) -> Result<T, Error> {
        let url = Self::endpoint(&self.private_api, path)?;
        self.get_json(url, Some(session), what).await
    }

    async fn request_free_view(&self, session: &Session, id: &str) -> Result<ViewsLimit, Error> {
        let url = Self::endpoint(&self.private_api, "users/me/views-limit")?;
        let resp = self
            .client
            .client
            .post(url)
            .headers(session.headers())
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::json!({ "movie_id": id }).to_string())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::from_status(resp.status(), "free view request"));
        }

        let body: ViewsLimitResponse = resp.json().await?;
        if body.status < 0 {
            return Err(Error::AccessDenied(format!(
                "free view request rejected (API status {}: {})",
                body.status,
                body.message.unwrap_or_default()
            )));
        }
        body.data
            .into_iter()
            .next()
            .ok_or_else(|| Error::Api("empty free view response".into()))
    }

    /// Asks the private API for a playlist URL, spending one of the day's
    /// free views if that is the only way in.
    async fn private_playlist(&self, session: &Session, id: &str) -> Result<String, Error> {
        let mut spent_view = false;

        loop {
            let detail: MovieDetail = self
                .get_private(session, &format!("movies/{}/detail", id), "movie detail")
                .await?;
            if detail.status < 0 {
                return Err(Error::AccessDenied(format!(
                    "private API status {}: {}",
                    detail.status,
                    detail.message.unwrap_or_default()
                )));
            }

            let item = detail
                .data
                .and_then(|d| d.items.into_iter().next())
                .ok_or_else(|| {
                    Error::AccessDenied("no playlist information for this movie".into())
                })?;

            if let Some(limit) = &item.views_limit {
                self.note_free_views(limit.remain);
            }
            if let Some(url) = item.media.first_available() {
                return Ok(url.to_string());
            }
            if spent_view || session.is_premium {
                return Err(Error::AccessDenied(
                    "no playlist available, check that you have access to this movie".into(),
                ));
            }

            match item.views_limit {
                Some(limit) if limit.has_permission && limit.remain > 0 => {
                    let granted = self.request_free_view(session, id).await?;
                    if !granted.has_permission {
                        return Err(Error::AccessDenied(
                            "failed to get movie access, no free views available".into(),
                        ));
                    }
                    self.note_free_views(granted.remain);
                    info!(
                        "[info:{}] using free view, {} remaining today",
                        id, granted.remain
                    );
                    spent_view = true;
                }
                _ => {
                    return Err(Error::AccessDenied(
                        "failed to get movie access, no free views available".into(),
                    ))
                }
            }
        }
    }

    async fn playlist_url(&self, id: &str, media: &Media) -> Result<String, Error> {
        if let Some(url) = media.public() {
            return Ok(url.to_string());
        }

        match self.session {
            Some(session) => {
                debug!("[info:{}] no public playlist, asking the private API", id);
                self.private_playlist(session, id).await
            }
            None => media.first_available().map(String::from).ok_or_else(|| {
                Error::AccessDenied(
                    "no playlist available, if you have access to this movie try --cookies".into(),
                )
            }),
        }
    }

    /// Parses the first master playlist candidate that can be fetched.
    async fn first_master(&self, id: &str, candidates: &[String]) -> Result<Vec<Format>, Error> {
        let mut last_err = None;
        for candidate in candidates {
            let base = match Url::parse(candidate) {
                Ok(base) => base,
                Err(e) => {
                    last_err = Some(Error::Api(format!("bad playlist url {}: {}", candidate, e)));
                    continue;
                }
            };
            debug!("[playlist:{}] trying {}", id, candidate);

            match self.client.fetch_text(candidate).await {
                Ok(text) => {
                    return playlist::parse_formats(&text, &base)
                        .map_err(|e| Error::Api(e.to_string()))
                }
                Err(e) => {
                    debug!("[playlist:{}] {} unavailable: {}", id, candidate, e);
                    last_err = Some(Error::Download(e));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Api("no playlist to fetch".into())))
    }

    /// Looks the channel up in user search, which returns a fuller document
    /// than `channels/<id>`.
    async fn search_channel(
        &self,
        channel: &serde_json::Value,
        name: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let mut url = Self::endpoint(&self.public_api, "search-users")?;
        url.query_pairs_mut().append_pair("search_query", name);

        let results: Vec<serde_json::Value> = self.get_json(url, None, "user search").await?;
        Ok(results.into_iter().find(|user| {
            user.get("name") == channel.get("name")
                && user.get("openrec_user_id") == channel.get("openrec_user_id")
        }))
    }
}

#[async_trait]
impl Site for OpenrecSite<'_> {
    async fn resolve(&self, id: &str) -> Result<Video, Error> {
        let what = format!("movie {}", id);
        let mut body: serde_json::Value = self.get_public(&format!("movies/{}", id), &what).await?;
        check_body(&body, &what)?;

        // Advertising data is of no use to anyone
        if let Some(obj) = body.as_object_mut() {
            obj.remove("ad");
        }
        let movie: PublicMovie =
            serde_json::from_value(body.clone()).map_err(|e| Error::Api(e.to_string()))?;

        let playlist_url = self.playlist_url(&movie.id, &movie.media).await?;
        debug!("[playlist:{}] got playlist {}", movie.id, playlist_url);
        let candidates = playlist::master_candidates(&playlist_url);
        let formats = self.first_master(&movie.id, &candidates).await?;

        Ok(Video {
            chat_available: movie.started_at.is_some(),
            id: movie.id,
            title: movie.title,
            started_at: movie.started_at,
            thumbnail_url: movie.thumbnail_url.filter(|u| !u.is_empty()),
            formats,
            details: body,
        })
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel, Error> {
        let what = format!("channel {}", channel_id);
        let basic: serde_json::Value = self
            .get_public(&format!("channels/{}", channel_id), &what)
            .await?;
        check_body(&basic, &what)?;
        let doc: ChannelDoc =
            serde_json::from_value(basic.clone()).map_err(|e| Error::Api(e.to_string()))?;

        let details = match self.search_channel(&basic, &doc.name).await {
            Ok(Some(full)) => full,
            Ok(None) => {
                warn!("[channel:{}] failed to get complete channel information", channel_id);
                basic
            }
            Err(e) => {
                warn!("[channel:{}] failed to get complete channel information: {}", channel_id, e);
                basic
            }
        };
        // The search document may carry image URLs the basic one lacks
        let (icon, cover) = match serde_json::from_value::<ChannelDoc>(details.clone()) {
            Ok(full) => (
                full.icon_image_url.or(doc.icon_image_url),
                full.cover_image_url.or(doc.cover_image_url),
            ),
            Err(_) => (doc.icon_image_url, doc.cover_image_url),
        };

        Ok(Channel {
            icon_image_url: icon.filter(|u| !u.is_empty()),
            cover_image_url: cover.filter(|u| !u.is_empty()),
            id: doc.id,
            name: doc.name,
            details,
        })
    }

    async fn channel_movie_ids(&self, channel_id: &str) -> Result<Vec<String>, Error> {
        let what = format!("channel {}", channel_id);
        let mut ids = Vec::new();
        let mut seen = HashSet::new();

        for page in 1.. {
            info!("[channel:{}] downloading videos page {}", channel_id, page);
            let movies: Vec<ChannelMovie> = self
                .get_public(
                    &format!("movies?channel_ids={}&page={}", channel_id, page),
                    &what,
                )
                .await?;

            let count = movies.len();
            let before = ids.len();
            for movie in movies {
                if seen.insert(movie.id.clone()) {
                    ids.push(movie.id);
                }
            }

            if count < MOVIES_PAGE_SIZE {
                break;
            }
            if ids.len() == before {
                warn!(
                    "[channel:{}] page {} only repeats earlier videos, stopping",
                    channel_id, page
                );
                break;
            }
        }
        Ok(ids)
    }

    async fn chat_page(&self, id: &str, from: DateTime<Utc>) -> Result<Vec<ChatEvent>, Error> {
        self.get_public(
            &format!(
                "movies/{}/chats?from_created_at={}&is_including_system_message=false",
                id,
                chat_cursor(from)
            ),
            "live chat",
        )
        .await
    }

    async fn download(&self, url: &str, path: &Path) -> Result<u64, Error> {
        Ok(self.client.download_file(url, path).await? as u64)
    }
}
