use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::util;

#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Turns a downloaded MPEG-TS stream into the final container.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Produces `output` from `input`. `input` is left untouched either way.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

/// Remuxes with an external `ffmpeg` binary, copying audio and video as-is.
pub struct Ffmpeg {
    pub program: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Converter for Ffmpeg {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        // ffmpeg can't infer the container from a .part name
        let temp_output = util::part_path(output);
        let format = output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();

        let mut child = tokio::process::Command::new(&self.program);

        child
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg(format)
            .arg(&temp_output)
            .stdin(std::process::Stdio::null());

        debug!("[ffmpeg] running {:?}", child);
        let out = child.output().await.map_err(ConversionError::IoError)?;

        if !out.status.success() {
            let _ = tokio::fs::remove_file(&temp_output).await;
            return Err(ConversionError::Failed {
                program: self.program.display().to_string(),
                status: out.status,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        tokio::fs::rename(&temp_output, output).await?;
        Ok(())
    }
}
