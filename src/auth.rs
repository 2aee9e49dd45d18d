use std::path::{Path, PathBuf};

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Url,
};
use reqwest_cookie_store::{CookieStore, RawCookie};
use serde::Deserialize;

use crate::util::HttpClient;

pub const COOKIE_DOMAIN: &str = "www.openrec.tv";
const LOGIN_URL: &str = "https://www.openrec.tv/viewapp/v4/mobile/user/login";

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("could not read cookies file '{}': {source}", .path.display())]
    CookieFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("login rejected: {0}")]
    Rejected(String),
    #[error("login request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Anonymous,
    CookieFile(PathBuf),
    Login { username: String, password: String },
}

/// Authentication state shared read-only by every private API call of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: String,
    pub uuid: Option<String>,
    pub is_premium: bool,
    /// Free views left today, when the site has told us.
    pub daily_free_views_remaining: Option<i64>,
}

impl Session {
    /// Picks the `access_token` and `uuid` cookies the private API expects.
    pub fn from_cookies(store: &CookieStore) -> Option<Session> {
        let url = Url::parse(&format!("https://{}/", COOKIE_DOMAIN)).ok()?;
        let cookies = store.matches(&url);
        let find = |name: &str| {
            cookies
                .iter()
                .find(|c| c.name() == name)
                .map(|c| c.value().to_string())
        };

        Some(Session {
            token: find("access_token")?,
            uuid: find("uuid"),
            ..Default::default()
        })
    }

    /// Headers the private API authenticates with.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.token) {
            headers.insert("access-token", v);
        }
        if let Some(Ok(v)) = self.uuid.as_deref().map(HeaderValue::from_str) {
            headers.insert("uuid", v);
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetscapeCookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Unix timestamp, 0 for session cookies.
    pub expires: i64,
    pub name: String,
    pub value: String,
}

/// Parses a Netscape/Mozilla `cookies.txt`. Malformed lines are skipped.
pub fn parse_netscape_cookies(text: &str) -> Vec<NetscapeCookie> {
    text.lines()
        .filter_map(|line| {
            let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
                Some(rest) => (rest, true),
                None => (line, false),
            };
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                debug!("[cookies] skipping malformed line '{}'", line);
                return None;
            }

            Some(NetscapeCookie {
                domain: fields[0].to_string(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                http_only,
                expires: fields[4].trim().parse().unwrap_or(0),
                name: fields[5].to_string(),
                value: fields[6].trim_end_matches('\r').to_string(),
            })
        })
        .collect()
}

impl NetscapeCookie {
    fn host(&self) -> &str {
        self.domain.trim_start_matches('.')
    }

    /// Whether this cookie would be sent to the site at all.
    pub fn applies_to(&self, host: &str) -> bool {
        let own = self.host();
        host == own || (self.include_subdomains && host.ends_with(&format!(".{}", own)))
    }

    fn insert_into(&self, store: &mut CookieStore, now: i64) {
        if self.expires != 0 && self.expires <= now {
            return;
        }

        let mut raw = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.include_subdomains {
            raw.push_str(&format!("; Domain={}", self.host()));
        }
        if self.secure {
            raw.push_str("; Secure");
        }
        if self.http_only {
            raw.push_str("; HttpOnly");
        }
        if self.expires != 0 {
            raw.push_str(&format!("; Max-Age={}", self.expires - now));
        }

        let url = match Url::parse(&format!("https://{}{}", self.host(), self.path)) {
            Ok(url) => url,
            Err(e) => {
                debug!("[cookies] bad domain/path for '{}': {}", self.name, e);
                return;
            }
        };
        match RawCookie::parse(raw) {
            Ok(cookie) => {
                if let Err(e) = store.insert_raw(&cookie, &url) {
                    debug!("[cookies] could not store '{}': {}", self.name, e);
                }
            }
            Err(e) => debug!("[cookies] could not parse '{}': {}", self.name, e),
        }
    }
}

/// Builds a cookie store holding only the jar's cookies that apply to the
/// site.
pub fn cookie_store_from_netscape(text: &str) -> CookieStore {
    let now = chrono::Utc::now().timestamp();
    let mut store = CookieStore::default();
    for cookie in parse_netscape_cookies(text)
        .iter()
        .filter(|c| c.applies_to(COOKIE_DOMAIN))
    {
        cookie.insert_into(&mut store, now);
    }
    store
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: i64,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Exchanges credentials for an HTTP client and, if the site accepted them,
/// a [`Session`].
///
/// Explicitly supplied credentials that the site rejects are an error. A
/// cookie jar without an access token is not: the run just continues
/// without elevated access.
pub async fn authenticate(
    credentials: &Credentials,
) -> Result<(HttpClient, Option<Session>), AuthError> {
    match credentials {
        Credentials::Anonymous => Ok((HttpClient::new()?, None)),
        Credentials::CookieFile(path) => from_cookie_file(path).await,
        Credentials::Login { username, password } => login(username, password).await,
    }
}

async fn from_cookie_file(path: &Path) -> Result<(HttpClient, Option<Session>), AuthError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AuthError::CookieFile {
            path: path.to_path_buf(),
            source,
        })?;

    let store = cookie_store_from_netscape(&text);
    let session = Session::from_cookies(&store);
    if session.is_none() {
        warn!(
            "[auth] no access token for {} in '{}', continuing without authentication",
            COOKIE_DOMAIN,
            path.display()
        );
    }

    Ok((HttpClient::with_cookies(store)?, session))
}

async fn login(
    username: &str,
    password: &str,
) -> Result<(HttpClient, Option<Session>), AuthError> {
    let client = HttpClient::new()?;
    let resp: LoginResponse = client
        .client
        .post(LOGIN_URL)
        .form(&[("mail", username), ("password", password)])
        .send()
        .await?
        .json()
        .await?;

    if resp.status < 0 {
        return Err(AuthError::Rejected(
            resp.error_message
                .unwrap_or_else(|| format!("status {}", resp.status)),
        ));
    }

    let session = {
        let store = match client.cookies.lock() {
            Ok(store) => store,
            Err(poisoned) => poisoned.into_inner(),
        };
        Session::from_cookies(&store)
    }
    .map(|s| Session {
        is_premium: resp
            .data
            .pointer("/items/0/is_premium")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        ..s
    })
    .ok_or_else(|| AuthError::Rejected("login succeeded but no access token was issued".into()))?;

    info!("[auth] logged in as {}", username);
    Ok((client, Some(session)))
}
