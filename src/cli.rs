use std::path::PathBuf;

use clap::Parser;

use crate::{auth::Credentials, pipeline::Options, selector::FormatSelector};

/// Downloads videos, metadata, thumbnails and chat replays from OPENREC.tv.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
pub struct Args {
    /// Video or channel links, or bare video IDs.
    #[arg(value_name = "REFERENCE", required = true)]
    pub references: Vec<String>,

    /// Print debug output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory to write files into.
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Skip videos whose ID is recorded in FILE, and record each video
    /// downloaded.
    #[arg(long, value_name = "FILE")]
    pub download_archive: Option<PathBuf>,

    /// Write video metadata to a .info.json file.
    #[arg(long)]
    pub write_info_json: bool,

    /// Write the full size thumbnail image.
    #[arg(long)]
    pub write_thumbnail: bool,

    /// Write the live chat replay to a .live_chat.json file.
    #[arg(long)]
    pub write_live_chat: bool,

    /// Format to download: `best`, a format name, a group ID, or
    /// `name=...`/`group=...` to match only one of them.
    #[arg(short, long, default_value = "best")]
    pub format: FormatSelector,

    /// List the available formats of each video and exit.
    #[arg(short = 'F', long)]
    pub list_formats: bool,

    /// Do not download the video.
    #[arg(long)]
    pub skip_download: bool,

    /// Keep the MPEG-TS file instead of converting it to MP4.
    #[arg(long)]
    pub skip_convert: bool,

    /// Netscape formatted cookies file to authenticate with.
    #[arg(long, value_name = "FILE", conflicts_with = "username")]
    pub cookies: Option<PathBuf>,

    /// Login mail address.
    #[arg(short, long, requires = "password")]
    pub username: Option<String>,

    /// Login password.
    #[arg(short, long, requires = "username")]
    pub password: Option<String>,

    /// Number of segments to download concurrently.
    #[arg(short = 'N', long, default_value_t = 1)]
    pub concurrent_fragments: usize,

    /// Path to the ffmpeg binary.
    #[arg(long, value_name = "PATH", default_value = "ffmpeg")]
    pub ffmpeg_location: PathBuf,
}

impl Args {
    pub fn credentials(&self) -> Credentials {
        match (&self.cookies, &self.username, &self.password) {
            (Some(path), _, _) => Credentials::CookieFile(path.clone()),
            (None, Some(username), Some(password)) => Credentials::Login {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Credentials::Anonymous,
        }
    }

    pub fn options(&self) -> Options {
        Options {
            directory: self.directory.clone(),
            format: self.format.clone(),
            list_formats: self.list_formats,
            skip_download: self.skip_download,
            skip_convert: self.skip_convert,
            write_info_json: self.write_info_json,
            write_thumbnail: self.write_thumbnail,
            write_live_chat: self.write_live_chat,
        }
    }
}

pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["openrec-dl", "abc"]).unwrap();
        assert_eq!(args.references, vec!["abc"]);
        assert_eq!(args.format, FormatSelector::Best);
        assert_eq!(args.concurrent_fragments, 1);
        assert_eq!(args.ffmpeg_location, PathBuf::from("ffmpeg"));
        assert!(matches!(args.credentials(), Credentials::Anonymous));

        let options = args.options();
        assert_eq!(options.directory, PathBuf::from("."));
        assert!(!options.skip_download);
    }

    #[test]
    fn flags() {
        let args = Args::try_parse_from([
            "openrec-dl",
            "-v",
            "-d",
            "out",
            "-f",
            "group=chunklist_720p",
            "-N",
            "4",
            "--skip-convert",
            "--write-live-chat",
            "--download-archive",
            "archive.txt",
            "abc",
            "https://www.openrec.tv/user/someone",
        ])
        .unwrap();

        assert!(args.verbose);
        assert_eq!(args.references.len(), 2);
        assert_eq!(args.download_archive, Some(PathBuf::from("archive.txt")));
        assert_eq!(args.concurrent_fragments, 4);

        let options = args.options();
        assert_eq!(options.directory, PathBuf::from("out"));
        assert_eq!(options.format, FormatSelector::GroupId("chunklist_720p".into()));
        assert!(options.skip_convert);
        assert!(options.write_live_chat);
        assert!(!options.write_info_json);
    }

    #[test]
    fn credentials() {
        let args =
            Args::try_parse_from(["openrec-dl", "--cookies", "cookies.txt", "abc"]).unwrap();
        assert!(matches!(args.credentials(), Credentials::CookieFile(p) if p == PathBuf::from("cookies.txt")));

        let args =
            Args::try_parse_from(["openrec-dl", "-u", "me@example.com", "-p", "pw", "abc"]).unwrap();
        assert!(matches!(
            args.credentials(),
            Credentials::Login { username, password } if username == "me@example.com" && password == "pw"
        ));
    }

    #[test]
    fn rejects_bad_combinations() {
        assert!(Args::try_parse_from(["openrec-dl"]).is_err());
        assert!(Args::try_parse_from(["openrec-dl", "-u", "me", "abc"]).is_err());
        assert!(Args::try_parse_from([
            "openrec-dl",
            "--cookies",
            "c.txt",
            "-u",
            "me",
            "-p",
            "pw",
            "abc"
        ])
        .is_err());
    }
}
