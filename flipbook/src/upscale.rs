//! Enlarging the extracted frames before they are put on pages.

mod local;
mod remote;

pub use local::LocalUpscaler;
pub use remote::{StabilityEngine, StabilityUpscaler, DEFAULT_STABILITY_HOST};

use std::path::{Path, PathBuf};

use crate::{pipeline::Stage, Error, Result};

/// What the upscaled images should be sized to. Only one side can be given, the other
/// follows from the aspect ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSize {
    Width(u32),
    Height(u32),
}

impl TargetSize {
    /// Both being set is a configuration error.
    pub fn from_options(width: Option<u32>, height: Option<u32>) -> Result<Option<Self>> {
        match (width, height) {
            (Some(_), Some(_)) => Err(Error::Configuration(
                "only one of the upscale width or height can be given".to_string(),
            )),
            (Some(0), None) | (None, Some(0)) => Err(Error::Configuration(
                "the upscale width or height must be positive".to_string(),
            )),
            (Some(width), None) => Ok(Some(TargetSize::Width(width))),
            (None, Some(height)) => Ok(Some(TargetSize::Height(height))),
            (None, None) => Ok(None),
        }
    }
}

pub trait Upscaler {
    /// Something to put in the logs
    fn describe(&self) -> String;

    /// Upscales every numbered PNG in `input` into `output`, keeping the file names.
    /// Returns how many images were upscaled. Fails on the first image that fails.
    fn upscale_dir(&self, input: &Path, output: &Path) -> Result<usize>;
}

/// Where the upscaled version of `image` goes.
fn output_for(image: &Path, output_dir: &Path) -> Result<PathBuf> {
    let name = image.file_name().ok_or_else(|| Error::UpscaleFailed {
        image: image.to_owned(),
        source: "the image path has no file name".into(),
    })?;
    Ok(output_dir.join(name))
}

fn images_in(dir: &Path) -> Result<Vec<PathBuf>> {
    crate::extract::numbered_files(dir, "png", Stage::Upscaled)
}
