use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;

use crate::error::Error;

/// What a user-supplied link or ID points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Movie(String),
    Channel(String),
}

fn link_regex() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:www\.)?openrec\.tv/(?P<kind>[^/]+?)/(?P<id>[^/]+)$")
            .expect("valid regex")
    })
}

fn id_regex() -> &'static Regex {
    static ID: OnceLock<Regex> = OnceLock::new();
    ID.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("valid regex"))
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Query strings, fragments and trailing slashes don't change the target
        let link = trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');

        if let Some(caps) = link_regex().captures(link) {
            let id = &caps["id"];
            return match &caps["kind"] {
                "live" => Ok(Reference::Movie(id.to_string())),
                "user" => Ok(Reference::Channel(id.to_string())),
                kind => {
                    debug!("[openrec] unknown link type '{}'", kind);
                    Err(Error::InvalidReference(s.to_string()))
                }
            };
        }

        if id_regex().is_match(trimmed) {
            return Ok(Reference::Movie(trimmed.to_string()));
        }

        Err(Error::InvalidReference(s.to_string()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Movie(id) => write!(f, "movie:{}", id),
            Reference::Channel(id) => write!(f, "channel:{}", id),
        }
    }
}
