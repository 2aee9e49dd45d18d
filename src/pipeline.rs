use std::path::{Path, PathBuf};

use crate::{
    api::{Channel, Site, Video},
    archive::ArchiveTracker,
    downloader::Fetch,
    error::Error,
    ffmpeg::Converter,
    playlist::Format,
    reference::Reference,
    selector::{self, FormatSelector},
    sidecar, util,
};

/// What to do with each reference.
#[derive(Debug, Clone)]
pub struct Options {
    pub directory: PathBuf,
    pub format: FormatSelector,
    pub list_formats: bool,
    pub skip_download: bool,
    pub skip_convert: bool,
    pub write_info_json: bool,
    pub write_thumbnail: bool,
    pub write_live_chat: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            format: FormatSelector::Best,
            list_formats: false,
            skip_download: false,
            skip_convert: false,
            write_info_json: false,
            write_thumbnail: false,
            write_live_chat: false,
        }
    }
}

/// How the processing of one movie ended, short of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already recorded in the download archive.
    Skipped,
    /// Formats were printed instead of downloading.
    Listed,
    /// Everything requested was written. `media` is `None` with
    /// `--skip-download`.
    Finalized { media: Option<PathBuf> },
}

/// Runs references one at a time through resolve, select, download, convert
/// and the sidecar writers.
pub struct Pipeline<'a> {
    site: &'a dyn Site,
    fetcher: &'a dyn Fetch,
    converter: &'a dyn Converter,
    options: &'a Options,
    archive: Option<ArchiveTracker>,
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

impl<'a> Pipeline<'a> {
    pub fn new(
        site: &'a dyn Site,
        fetcher: &'a dyn Fetch,
        converter: &'a dyn Converter,
        options: &'a Options,
        archive: Option<ArchiveTracker>,
    ) -> Self {
        Self {
            site,
            fetcher,
            converter,
            options,
            archive,
        }
    }

    pub fn archive(&self) -> Option<&ArchiveTracker> {
        self.archive.as_ref()
    }

    /// Processes every reference and returns how many movies (or references
    /// that never got that far) failed. One failure never stops the rest.
    pub async fn run<S: AsRef<str>>(&mut self, references: &[S]) -> usize {
        let mut failures = 0;

        for raw in references {
            let raw = raw.as_ref();
            match raw.parse::<Reference>() {
                Ok(Reference::Movie(id)) => {
                    if self.process_logged(&id).await.is_err() {
                        failures += 1;
                    }
                }
                Ok(Reference::Channel(id)) => failures += self.process_channel(&id).await,
                Err(e) => {
                    error!("[openrec] {}", e);
                    failures += 1;
                }
            }
        }

        failures
    }

    async fn process_channel(&mut self, channel_id: &str) -> usize {
        if self.options.list_formats {
            error!(
                "[channel:{}] cannot use --list-formats with a channel link",
                channel_id
            );
            return 1;
        }

        let ids = match self.site.channel(channel_id).await {
            Ok(channel) => {
                self.write_channel_sidecars(&channel).await;
                self.site.channel_movie_ids(&channel.id).await
            }
            Err(e) => Err(e),
        };
        let ids = match ids {
            Ok(ids) => ids,
            Err(e) => {
                error!("[channel:{}] failed to get channel information: {}", channel_id, e);
                return 1;
            }
        };

        let mut failures = 0;
        for (i, id) in ids.iter().enumerate() {
            info!(
                "[channel:{}] downloading video {} of {}",
                channel_id,
                i + 1,
                ids.len()
            );
            if self.process_logged(id).await.is_err() {
                failures += 1;
            }
        }
        failures
    }

    async fn process_logged(&mut self, id: &str) -> Result<Outcome, Error> {
        let result = self.process_movie(id).await;
        if let Err(e) = &result {
            error!("[movie:{}] {}", id, e);
        }
        result
    }

    /// Takes one movie ID from pending to a terminal state.
    pub async fn process_movie(&mut self, id: &str) -> Result<Outcome, Error> {
        if self.archive.as_ref().is_some_and(|a| a.contains(id)) {
            info!("[movie:{}] already recorded in archive", id);
            return Ok(Outcome::Skipped);
        }

        let video = self.site.resolve(id).await?;

        if self.options.list_formats {
            info!("[movie:{}] available formats:", video.id);
            print!("{}", selector::format_table(&video.formats));
            return Ok(Outcome::Listed);
        }

        // Selection happens before anything touches the disk
        let format = if self.options.skip_download {
            None
        } else {
            Some(selector::select(&video.formats, &self.options.format)?)
        };

        let name = util::sanitize_filename(&format!("{} [{}]", video.title, video.id));
        self.write_sidecars(&video, &name).await;

        let Some(format) = format else {
            info!("[movie:{}] skipping download", video.id);
            return Ok(Outcome::Finalized { media: None });
        };

        let media = self.download(&video, format, &name).await?;

        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.record(&video.id).await {
                warn!(
                    "[movie:{}] could not record in archive '{}': {}",
                    video.id,
                    archive.path().display(),
                    e
                );
            }
        }

        Ok(Outcome::Finalized { media: Some(media) })
    }

    async fn download(&self, video: &Video, format: &Format, name: &str) -> Result<PathBuf, Error> {
        let label = format!("movie:{}", video.id);
        let ts = self.options.directory.join(format!("{}.ts", name));
        let mp4 = self.options.directory.join(format!("{}.mp4", name));

        if exists(&mp4).await {
            info!("[{}] already downloaded", label);
            return Ok(mp4);
        }

        if exists(&ts).await {
            info!("[{}] already downloaded", label);
        } else {
            info!("[{}] writing video to '{}.ts' ({})", label, name, format.name);
            let size = self.fetcher.fetch(&label, format, &ts).await?;
            debug!("[{}] downloaded {}", label, util::format_bytes(size));
        }

        if self.options.skip_convert {
            return Ok(ts);
        }

        info!("[mpeg-convert] converting video to '{}.mp4'", name);
        // On failure the .ts stays where it is
        self.converter.convert(&ts, &mp4).await?;

        if let Err(e) = tokio::fs::remove_file(&ts).await {
            warn!("[mpeg-convert] could not remove '{}': {}", ts.display(), e);
        }
        Ok(mp4)
    }

    async fn write_channel_sidecars(&self, channel: &Channel) {
        let dir = &self.options.directory;
        let name = util::sanitize_filename(&format!("{} [{}]", channel.name, channel.id));

        if self.options.write_info_json {
            let path = sidecar::info_json_path(dir, &name);
            info!("[info:{}] writing channel information to '{}.info.json'", channel.id, name);
            if let Err(e) = sidecar::write_channel_info_json(channel, &path).await {
                warn!("[info:{}] failed to write channel information: {}", channel.id, e);
            }
        }

        if self.options.write_thumbnail {
            for (kind, result) in sidecar::write_channel_images(self.site, channel, dir, &name).await {
                match result {
                    Ok(path) => info!(
                        "[{}:{}] wrote channel {} to '{}'",
                        kind,
                        channel.id,
                        kind,
                        path.file_name().unwrap_or_default().to_string_lossy()
                    ),
                    Err(e) => warn!("[{}:{}] failed to retrieve channel {}: {}", kind, channel.id, kind, e),
                }
            }
        }
    }

    async fn write_sidecars(&self, video: &Video, name: &str) {
        let dir = &self.options.directory;

        if self.options.write_info_json {
            let path = sidecar::info_json_path(dir, name);
            info!("[info:{}] writing video information to '{}.info.json'", video.id, name);
            if let Err(e) = sidecar::write_info_json(video, &path).await {
                warn!("[info:{}] failed to write video information: {}", video.id, e);
            }
        }

        if self.options.write_thumbnail {
            match sidecar::write_thumbnail(self.site, video, dir, name).await {
                Ok(path) => info!(
                    "[thumbnail:{}] wrote thumbnail to '{}'",
                    video.id,
                    path.file_name().unwrap_or_default().to_string_lossy()
                ),
                Err(e) => warn!("[thumbnail:{}] failed to retrieve thumbnail: {}", video.id, e),
            }
        }

        if self.options.write_live_chat {
            let path = sidecar::live_chat_path(dir, name);
            if exists(&path).await {
                info!("[live-chat:{}] already downloaded", video.id);
            } else {
                info!("[live-chat:{}] writing live chat to '{}.live_chat.json'", video.id, name);
                match sidecar::write_live_chat(self.site, video, &path).await {
                    Ok(n) => debug!("[live-chat:{}] {} messages", video.id, n),
                    Err(e) => warn!("[live-chat:{}] failed to write live chat: {}", video.id, e),
                }
            }
        }
    }
}
