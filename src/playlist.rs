use std::sync::OnceLock;

use m3u8_rs::{AlternativeMedia, AlternativeMediaType, Playlist};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;

/// One concrete rendition of a video, as listed by its master playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Format {
    pub name: String,
    pub group_id: String,
    pub resolution: Option<String>,
    pub frame_rate: Option<f64>,
    /// Peak bitrate in bits per second.
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub is_source: bool,
    /// Absolute URL of the rendition's media playlist.
    pub stream_url: String,
}

#[derive(thiserror::Error, Debug)]
pub enum PlaylistError {
    #[error("could not parse playlist: {0}")]
    Parse(String),
    #[error("expected a media playlist but got a master playlist")]
    UnexpectedMaster,
    #[error("bad segment url: {0}")]
    Url(String),
}

/// Where a playlist is hosted, which decides what sibling playlists exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistHost {
    /// Old S3 hosting with a single index and little metadata.
    Legacy,
    /// Cloudfront hosting; `index` is the file stem of the playlist given.
    Cloudfront { index: String },
    /// Cloudfront hosting for game streams.
    Game { index: String },
    Unknown,
}

struct HostPatterns {
    legacy: Regex,
    cloudfront: Regex,
    game: Regex,
}

fn host_patterns() -> &'static HostPatterns {
    static PATTERNS: OnceLock<HostPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HostPatterns {
        legacy: Regex::new(
            r"^https?://openrec-live\.s3\.amazonaws\.com/studio/[0-9]+/(?P<vid>[0-9]+)/index\.m3u8$",
        )
        .expect("valid regex"),
        cloudfront: Regex::new(r"^https?://[a-z0-9]+\.cloudfront\.net/[a-f0-9]+/(?P<pname>[^/]+)\.m3u8$")
            .expect("valid regex"),
        game: Regex::new(
            r"^https?://[a-z0-9]+\.cloudfront\.net/[0-9]+/[0-9]+_[a-zA-Z]+/game/(?P<pname>[^/]+)\.m3u8$",
        )
        .expect("valid regex"),
    })
}

pub fn classify_host(url: &str) -> PlaylistHost {
    let patterns = host_patterns();
    if patterns.legacy.is_match(url) {
        PlaylistHost::Legacy
    } else if let Some(caps) = patterns.cloudfront.captures(url) {
        PlaylistHost::Cloudfront {
            index: caps["pname"].to_string(),
        }
    } else if let Some(caps) = patterns.game.captures(url) {
        PlaylistHost::Game {
            index: caps["pname"].to_string(),
        }
    } else {
        PlaylistHost::Unknown
    }
}

/// Master playlists worth trying for a resolved playlist URL, best first.
///
/// Cloudfront hosting exposes a `playlist.m3u8` index with richer format
/// metadata next to whatever index the API handed out. It is not guaranteed
/// to exist, so the resolved URL always comes last.
pub fn master_candidates(url: &str) -> Vec<String> {
    match classify_host(url) {
        PlaylistHost::Cloudfront { index } if index != "playlist" => {
            let derived = Url::parse(url)
                .and_then(|u| u.join("playlist.m3u8"))
                .map(|u| u.to_string());
            match derived {
                Ok(derived) => vec![derived, url.to_string()],
                Err(_) => vec![url.to_string()],
            }
        }
        PlaylistHost::Legacy => {
            debug!("[playlist] older hosting found, format metadata will be sparse");
            vec![url.to_string()]
        }
        PlaylistHost::Unknown => {
            warn!("[playlist] unrecognized playlist host for '{}'", url);
            vec![url.to_string()]
        }
        _ => vec![url.to_string()],
    }
}

fn parse(text: &str) -> Result<Playlist, PlaylistError> {
    m3u8_rs::parse_playlist_res(text.as_bytes()).map_err(|e| PlaylistError::Parse(e.to_string()))
}

fn join(base: &Url, uri: &str) -> Result<String, PlaylistError> {
    base.join(uri)
        .map(|u| u.to_string())
        .map_err(|e| PlaylistError::Url(format!("{}: {}", uri, e)))
}

/// Names a variant that has no `EXT-X-MEDIA` entry of its own.
fn derived_name(uri: &str, resolution: Option<&m3u8_rs::Resolution>) -> String {
    if uri.contains("source") {
        "Source".to_string()
    } else if let Some(res) = resolution {
        format!("{}p", res.height)
    } else {
        let first = uri.split('/').next().unwrap_or(uri);
        first.split('.').next().unwrap_or(first).to_string()
    }
}

/// Lists the formats of a master playlist fetched from `base`.
///
/// A media playlist yields a single format pointing back at `base` itself.
pub fn parse_formats(text: &str, base: &Url) -> Result<Vec<Format>, PlaylistError> {
    let master = match parse(text)? {
        Playlist::MasterPlaylist(master) => master,
        Playlist::MediaPlaylist(_) => {
            return Ok(vec![Format {
                name: "index".to_string(),
                group_id: String::new(),
                resolution: None,
                frame_rate: None,
                bandwidth: 0,
                codecs: None,
                is_source: false,
                stream_url: base.to_string(),
            }])
        }
    };

    let video_media: Vec<&AlternativeMedia> = master
        .alternatives
        .iter()
        .filter(|a| a.media_type == AlternativeMediaType::Video)
        .collect();
    let variants: Vec<_> = master.variants.iter().filter(|v| !v.is_i_frame).collect();

    variants
        .iter()
        .enumerate()
        .map(|(i, v)| {
            // Prefer the rendition group the variant names, then fall back to
            // document order when every variant has exactly one entry
            let media = v
                .video
                .as_ref()
                .and_then(|g| video_media.iter().find(|a| &a.group_id == g))
                .or_else(|| {
                    (video_media.len() == variants.len())
                        .then(|| video_media.get(i))
                        .flatten()
                });

            let (name, group_id) = match media {
                Some(m) => (m.name.clone(), m.group_id.clone()),
                None => {
                    debug!("[playlist] no media details for '{}', using format details", v.uri);
                    (derived_name(&v.uri, v.resolution.as_ref()), String::new())
                }
            };

            Ok(Format {
                is_source: name.eq_ignore_ascii_case("source"),
                name,
                group_id,
                resolution: v
                    .resolution
                    .as_ref()
                    .map(|r| format!("{}x{}", r.width, r.height)),
                frame_rate: v.frame_rate,
                bandwidth: v.bandwidth,
                codecs: v.codecs.clone(),
                stream_url: join(base, &v.uri)?,
            })
        })
        .collect()
}

/// Absolute segment URLs of a media playlist fetched from `base`, in order.
pub fn parse_segments(text: &str, base: &Url) -> Result<Vec<String>, PlaylistError> {
    match parse(text)? {
        Playlist::MediaPlaylist(media) => media
            .segments
            .iter()
            .map(|s| join(base, &s.uri))
            .collect(),
        Playlist::MasterPlaylist(_) => Err(PlaylistError::UnexpectedMaster),
    }
}
