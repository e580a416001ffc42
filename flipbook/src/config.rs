use std::{
    ffi::OsString,
    fmt,
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    time::Duration,
};

use flipbook_common::utils::fsutils::read_optional_file;

use crate::{
    pipeline::Stage,
    render::PageKind,
    upscale::{LocalUpscaler, StabilityEngine, StabilityUpscaler, TargetSize, Upscaler},
    Error, Result,
};

/// Physical page dimensions in inches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageGeometry {
    pub width_in: f64,
    pub height_in: f64,
    pub margin_in: f64,
}

impl PageGeometry {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width_in), ("height", self.height_in)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Configuration(format!(
                    "the page {name} must be positive, got {value}"
                )));
            }
        }
        if !(self.margin_in.is_finite() && self.margin_in >= 0.0) {
            return Err(Error::Configuration(format!(
                "the margin must not be negative, got {}",
                self.margin_in
            )));
        }
        Ok(())
    }
}

/// Which page of a frame's pair comes first.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PageOrder {
    #[default]
    ImageFirst,
    BlankFirst,
}

impl PageOrder {
    pub fn kinds(self) -> [PageKind; 2] {
        match self {
            PageOrder::ImageFirst => [PageKind::Image, PageKind::Blank],
            PageOrder::BlankFirst => [PageKind::Blank, PageKind::Image],
        }
    }
}

/// An API key that never shows up in logs.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(Error::Configuration("the API key is empty".to_string()));
        }
        Ok(Self(key))
    }

    /// Reads the key from a credentials file, which only contains the key.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = read_optional_file(path)
            .map_err(Error::io(
                Stage::Init,
                format!("failed to read the credentials at '{}'", path.display()),
            ))?
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "the credentials file '{}' does not exist",
                    path.display()
                ))
            })?;
        Self::new(contents)
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Clone, Debug)]
pub enum UpscaleBackend {
    /// A super-resolution model run locally, one image at a time
    Local { program: OsString, model: String },
    /// The Stability AI REST API, several images at a time. The key is read from
    /// `credentials` when the upscaler is built.
    Stability {
        credentials: PathBuf,
        engine: StabilityEngine,
        host: String,
        jobs: NonZeroUsize,
        timeout: Duration,
    },
}

#[derive(Clone, Debug)]
pub struct UpscaleConfig {
    pub backend: UpscaleBackend,
    pub target: Option<TargetSize>,
}

impl UpscaleConfig {
    /// Reads the credentials, if any, so the configuration should be validated first.
    pub fn build(&self) -> Result<Box<dyn Upscaler>> {
        Ok(match &self.backend {
            UpscaleBackend::Local { program, model } => Box::new(LocalUpscaler::new(
                program.clone(),
                model.clone(),
                self.target,
            )),
            UpscaleBackend::Stability {
                credentials,
                engine,
                host,
                jobs,
                timeout,
            } => Box::new(StabilityUpscaler::new(
                ApiKey::read_from(credentials)?,
                *engine,
                host.clone(),
                self.target,
                *jobs,
                *timeout,
            )?),
        })
    }
}

/// Everything a run needs to know. Immutable once handed to the pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    pub video: PathBuf,
    pub geometry: PageGeometry,
    pub page_template: PathBuf,
    pub blank_template: PathBuf,
    /// The Typst project root, must contain `scratch_dir`
    pub root: PathBuf,
    pub output: PathBuf,
    pub fps: NonZeroU32,
    pub scratch_dir: PathBuf,
    pub keep_scratch: bool,
    pub page_order: PageOrder,
    /// None to not upscale
    pub upscale: Option<UpscaleConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;

        must_be_file(&self.video, "video")?;
        must_be_file(&self.page_template, "page template")?;
        must_be_file(&self.blank_template, "blank template")?;

        if !self.root.is_dir() {
            return Err(Error::Configuration(format!(
                "the root '{}' is not a directory",
                self.root.display()
            )));
        }

        let parent = scratch_parent(&self.scratch_dir);
        if !parent.is_dir() {
            return Err(Error::Configuration(format!(
                "the parent of the temporary directory '{}' does not exist",
                self.scratch_dir.display()
            )));
        }

        let root = canonical(&self.root, Stage::Init)?;
        let parent = canonical(parent, Stage::Init)?;
        if !parent.starts_with(&root) {
            return Err(Error::Configuration(format!(
                "the temporary directory '{}' must be inside the root '{}', or the \
                 templates can't read the frames",
                self.scratch_dir.display(),
                self.root.display()
            )));
        }

        Ok(())
    }
}

fn must_be_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "the {what} '{}' does not exist",
            path.display()
        )))
    }
}

fn scratch_parent(scratch: &Path) -> &Path {
    match scratch.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub(crate) fn canonical(path: &Path, stage: Stage) -> Result<PathBuf> {
    path.canonicalize().map_err(Error::io(
        stage,
        format!("failed to resolve '{}'", path.display()),
    ))
}
