use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// IDs that were already downloaded, backed by an append-only text file with
/// one ID per line.
#[derive(Debug)]
pub struct ArchiveTracker {
    path: PathBuf,
    ids: HashSet<String>,
    /// The file's last line has no terminating newline yet.
    unterminated: bool,
}

impl ArchiveTracker {
    /// Loads the archive at `path`. A missing file is an empty archive.
    pub async fn load(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let ids: HashSet<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        let unterminated = !text.is_empty() && !text.ends_with('\n');

        debug!("[archive] loaded {} ids from '{}'", ids.len(), path.display());
        Ok(Self {
            path,
            ids,
            unterminated,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Appends `id` to the file unless it is already recorded.
    pub async fn record(&mut self, id: &str) -> std::io::Result<()> {
        if self.ids.contains(id) {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = if self.unterminated {
            format!("\n{}\n", id)
        } else {
            format!("{}\n", id)
        };
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.unterminated = false;
        self.ids.insert(id.to_string());
        Ok(())
    }
}
