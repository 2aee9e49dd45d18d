use std::{convert::Infallible, fmt, str::FromStr};

use crate::{error::Error, playlist::Format};

/// Which format to download, as requested with `--format`.
///
/// A plain value matches a format name first and a group ID second. The
/// `name=` and `group=` prefixes restrict matching to one of the two.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormatSelector {
    #[default]
    Best,
    Name(String),
    GroupId(String),
    NameOrGroupId(String),
}

impl FromStr for FormatSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(if s.eq_ignore_ascii_case("best") {
            FormatSelector::Best
        } else if let Some(name) = s.strip_prefix("name=") {
            FormatSelector::Name(name.to_string())
        } else if let Some(group) = s.strip_prefix("group=") {
            FormatSelector::GroupId(group.to_string())
        } else {
            FormatSelector::NameOrGroupId(s.to_string())
        })
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSelector::Best => write!(f, "best"),
            FormatSelector::Name(n) => write!(f, "name={}", n),
            FormatSelector::GroupId(g) => write!(f, "group={}", g),
            FormatSelector::NameOrGroupId(v) => write!(f, "{}", v),
        }
    }
}

/// The source-quality entry if there is one, otherwise the highest bitrate.
/// Ties go to whichever format is listed first.
fn best(formats: &[Format]) -> Option<&Format> {
    formats.iter().find(|f| f.is_source).or_else(|| {
        formats
            .iter()
            .fold(None, |best: Option<&Format>, f| match best {
                Some(b) if b.bandwidth >= f.bandwidth => Some(b),
                _ => Some(f),
            })
    })
}

/// Picks exactly one format for `selector`.
pub fn select<'a>(formats: &'a [Format], selector: &FormatSelector) -> Result<&'a Format, Error> {
    let by_name = |n: &str| formats.iter().find(|f| f.name == n);
    let by_group = |g: &str| formats.iter().find(|f| !f.group_id.is_empty() && f.group_id == g);

    match selector {
        FormatSelector::Best => best(formats),
        FormatSelector::Name(n) => by_name(n),
        FormatSelector::GroupId(g) => by_group(g),
        FormatSelector::NameOrGroupId(v) => by_name(v).or_else(|| by_group(v)),
    }
    .ok_or_else(|| Error::FormatNotFound(selector.to_string()))
}

/// Renders the `--list-formats` table.
pub fn format_table(formats: &[Format]) -> String {
    let mut out = format!(
        "{:<10} {:<8} {:<10} {:<4} {:<6} {:<24}\n",
        "NAME", "GROUP-ID", "RESOLUTION", "FPS", "TBR", "CODECS"
    );
    out.push_str(&format!(
        "{} {} {} {} {} {}\n",
        "-".repeat(10),
        "-".repeat(8),
        "-".repeat(10),
        "-".repeat(4),
        "-".repeat(6),
        "-".repeat(24)
    ));

    for f in formats {
        let fps = f.frame_rate.map(|r| format!("{}", r.round())).unwrap_or_default();
        out.push_str(&format!(
            "{:<10} {:<8} {:<10} {:<4} {:<6} {:<24}\n",
            f.name,
            f.group_id,
            f.resolution.as_deref().unwrap_or(""),
            fps,
            format!("{}k", f.bandwidth / 1000),
            f.codecs.as_deref().unwrap_or(""),
        ));
    }

    out
}
