use std::{
    ffi::OsString,
    num::NonZeroU32,
    path::{Path, PathBuf},
    process::Command,
};

use flipbook_common::utils::{fsutils, numbered};

use crate::{command, pipeline::Stage, Error, Result};

/// The file name pattern of extracted frames, as given to ffmpeg.
pub const FRAME_PATTERN: &str = "frame_%04d.png";

/// Samples a video into numbered image files.
pub trait FrameExtractor {
    /// Writes one image per sample into `dest`, which must be an existing empty
    /// directory. The images are numbered from 1.
    fn extract(&self, video: &Path, fps: NonZeroU32, dest: &Path) -> Result<()>;
}

pub struct FfmpegExtractor {
    program: OsString,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegExtractor {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn extract(&self, video: &Path, fps: NonZeroU32, dest: &Path) -> Result<()> {
        let empty = fsutils::is_dir_empty(dest).map_err(Error::io(
            Stage::FramesExtracted,
            format!("failed to inspect '{}'", dest.display()),
        ))?;
        if !empty {
            return Err(Error::Configuration(format!(
                "the frame directory '{}' must be an existing empty directory",
                dest.display()
            )));
        }

        command::run(
            Command::new(&self.program)
                .arg("-hide_banner")
                .arg("-nostdin")
                .args(["-loglevel", "error"])
                .arg("-i")
                .arg(video)
                .arg("-vf")
                .arg(format!("fps={fps}"))
                .arg(dest.join(FRAME_PATTERN)),
        )
        .map_err(|source| Error::ExtractionFailed {
            video: video.to_owned(),
            source,
        })?;

        Ok(())
    }
}

/// All files in `dir` with the given extension, in sequence number order.
pub fn numbered_files(dir: &Path, extension: &str, stage: Stage) -> Result<Vec<PathBuf>> {
    let files: Vec<PathBuf> = fsutils::all_files([dir]).map_err(Error::io(
        stage,
        format!("failed to list the files in '{}'", dir.display()),
    ))?;

    let files = files
        .into_iter()
        .filter(|path| path.extension().is_some_and(|ext| ext == extension));

    numbered::sort_numbered(files).map_err(|source| Error::Unnumbered { stage, source })
}
