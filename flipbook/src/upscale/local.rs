use std::{ffi::OsString, path::Path, process::Command, time::Duration};

use flipbook_common::utils::time::Every;
use image::{imageops::FilterType, GenericImageView, ImageResult};

use super::{images_in, output_for, TargetSize, Upscaler};
use crate::{command, Error, Result};

/// Runs a super-resolution model binary, like `realesrgan-ncnn-vulkan`, once per image
/// as `PROGRAM -i IN -o OUT -n MODEL`. The result is then resized to the target size, if
/// there is one.
pub struct LocalUpscaler {
    program: OsString,
    model: String,
    target: Option<TargetSize>,
}

impl LocalUpscaler {
    pub fn new(
        program: impl Into<OsString>,
        model: impl Into<String>,
        target: Option<TargetSize>,
    ) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
            target,
        }
    }

    fn upscale_one(&self, image: &Path, output: &Path) -> Result<()> {
        command::run(
            Command::new(&self.program)
                .arg("-i")
                .arg(image)
                .arg("-o")
                .arg(output)
                .arg("-n")
                .arg(&self.model),
        )
        .map_err(|source| Error::UpscaleFailed {
            image: image.to_owned(),
            source: source.into(),
        })?;

        if let Some(target) = self.target {
            resize_to(output, target).map_err(|source| Error::UpscaleFailed {
                image: image.to_owned(),
                source: source.into(),
            })?;
        }

        Ok(())
    }
}

impl Upscaler for LocalUpscaler {
    fn describe(&self) -> String {
        format!(
            "local model '{}' with {}",
            self.model,
            self.program.to_string_lossy()
        )
    }

    fn upscale_dir(&self, input: &Path, output: &Path) -> Result<usize> {
        let images = images_in(input)?;
        log::info!("Upscaling {} images in {}", images.len(), input.display());

        let mut every = Every::new(Duration::from_secs(5));
        for (i, image) in images.iter().enumerate() {
            let out = output_for(image, output)?;
            self.upscale_one(image, &out)?;
            log::debug!("Upscaled image saved to: {}", out.display());
            every.perform(|| log::info!("Upscaled {}/{} images", i + 1, images.len()));
        }

        Ok(images.len())
    }
}

/// Resizes the image at `path` in place, keeping its aspect ratio.
fn resize_to(path: &Path, target: TargetSize) -> ImageResult<()> {
    let img = image::open(path)?;
    let (width, height) = img.dimensions();
    let (new_width, new_height) = match target {
        TargetSize::Width(new_width) => (new_width, scale_side(height, new_width, width)),
        TargetSize::Height(new_height) => {
            (scale_side(width, new_height, height), new_height)
        }
    };
    if (new_width, new_height) == (width, height) {
        return Ok(());
    }
    img.resize_exact(new_width, new_height, FilterType::Lanczos3)
        .save(path)
}

/// The length of `side` when the other side goes from `old` to `new`, rounded.
fn scale_side(side: u32, new: u32, old: u32) -> u32 {
    if old == 0 {
        return side;
    }
    let scaled = (u64::from(side) * u64::from(new) + u64::from(old) / 2) / u64::from(old);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}
