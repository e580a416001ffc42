//! Drives a whole run: extract, (upscale), render, merge and clean up.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use flipbook_common::{
    bin_common::termination::Cookie,
    utils::time::{format_elapsed, Every},
};

use crate::{
    config::{canonical, Config},
    extract::{numbered_files, FfmpegExtractor, FrameExtractor},
    merge::{DocumentMerger, PdfMerger},
    probe::{DurationProbe, FfmpegProbe},
    render::{root_relative, Page, PageKind, PageRenderer, TypstRenderer},
    scratch::Scratch,
    upscale::Upscaler,
    Error, Result,
};

/// The states a run goes through, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    ScratchCreated,
    FramesExtracted,
    Upscaled,
    PagesRendered,
    Merged,
    CleanedUp,
}

impl fmt::Display for Stage {
    /// Names the work done to reach the stage
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "configuration",
            Stage::ScratchCreated => "scratch setup",
            Stage::FramesExtracted => "frame extraction",
            Stage::Upscaled => "upscaling",
            Stage::PagesRendered => "page rendering",
            Stage::Merged => "merging",
            Stage::CleanedUp => "cleanup",
        };
        f.write_str(name)
    }
}

/// What a successful run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub frames: usize,
    pub pages: usize,
    /// Seconds
    pub duration: f64,
    pub output: PathBuf,
}

pub struct Pipeline {
    config: Config,
    probe: Box<dyn DurationProbe>,
    extractor: Box<dyn FrameExtractor>,
    upscaler: Option<Box<dyn Upscaler>>,
    renderer: Box<dyn PageRenderer>,
    merger: Box<dyn DocumentMerger>,
    cookie: Cookie,
}

impl Pipeline {
    /// A pipeline using ffmpeg, typst, lopdf and the configured upscaler. The
    /// configuration is validated before the upscaler is built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let upscaler = config
            .upscale
            .as_ref()
            .map(|upscale| upscale.build())
            .transpose()?;
        Ok(Self {
            config,
            probe: Box::new(FfmpegProbe::default()),
            extractor: Box::new(FfmpegExtractor::default()),
            upscaler,
            renderer: Box::new(TypstRenderer::default()),
            merger: Box::new(PdfMerger),
            cookie: Cookie::detached(),
        })
    }

    pub fn with_probe(mut self, probe: impl DurationProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_extractor(mut self, extractor: impl FrameExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn with_upscaler(mut self, upscaler: Option<Box<dyn Upscaler>>) -> Self {
        self.upscaler = upscaler;
        self
    }

    pub fn with_renderer(mut self, renderer: impl PageRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn with_merger(mut self, merger: impl DocumentMerger + 'static) -> Self {
        self.merger = Box::new(merger);
        self
    }

    /// Checked between steps, the run is aborted if it has been triggered.
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self) -> Result<Report> {
        log::info!("Validating the configuration");
        self.config.validate()?;

        self.check_termination(Stage::ScratchCreated)?;
        let scratch = Scratch::create(&self.config.scratch_dir, self.config.keep_scratch)?;
        reached(Stage::ScratchCreated);

        let result = self.run_in(&scratch);

        let cleanup = scratch.close();
        match (result, cleanup) {
            (Ok(report), Ok(())) => {
                reached(Stage::CleanedUp);
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(Error::Io {
                stage: Stage::CleanedUp,
                context: format!(
                    "failed to remove the temporary directory at '{}'",
                    self.config.scratch_dir.display()
                ),
                source: e,
            }),
            (Err(e), cleanup) => {
                if let Err(cleanup) = cleanup {
                    log::error!("Failed to clean up as well: {cleanup}");
                }
                Err(e)
            }
        }
    }

    fn run_in(&self, scratch: &Scratch) -> Result<Report> {
        let video = &self.config.video;

        self.check_termination(Stage::FramesExtracted)?;
        log::info!(
            "Extracting frames from {} at {} fps",
            video.display(),
            self.config.fps
        );
        self.extractor
            .extract(video, self.config.fps, &scratch.frames())?;
        let frames = numbered_files(&scratch.frames(), "png", Stage::FramesExtracted)?;
        if frames.is_empty() {
            return Err(Error::NoFrames {
                video: video.clone(),
            });
        }
        let duration = self.probe.duration(video)?;
        log::info!("Extracted {} frames", frames.len());
        reached(Stage::FramesExtracted);

        let frames = match &self.upscaler {
            Some(upscaler) => {
                self.check_termination(Stage::Upscaled)?;
                log::info!("Upscaling with {}", upscaler.describe());
                upscaler.upscale_dir(&scratch.frames(), &scratch.upscaled())?;
                let upscaled = upscaled_frames(&frames, &scratch.upscaled())?;
                reached(Stage::Upscaled);
                upscaled
            }
            None => {
                log::info!("Not upscaling");
                frames
            }
        };

        let pages = self.render_pages(&frames, duration, scratch)?;
        reached(Stage::PagesRendered);

        self.check_termination(Stage::Merged)?;
        let documents = numbered_files(&scratch.pages(), "pdf", Stage::Merged)?;
        if documents.len() != pages {
            return Err(Error::MergeFailed {
                output: self.config.output.clone(),
                path: scratch.pages(),
                source: format!(
                    "expected {} rendered pages but found {}",
                    pages,
                    documents.len()
                )
                .into(),
            });
        }
        log::info!("Merging {} pages into {}", pages, self.config.output.display());
        self.merger.merge(&documents, &self.config.output)?;
        reached(Stage::Merged);

        Ok(Report {
            frames: frames.len(),
            pages,
            duration,
            output: self.config.output.clone(),
        })
    }

    /// Renders two pages per frame and returns the number of pages.
    fn render_pages(
        &self,
        frames: &[PathBuf],
        duration: f64,
        scratch: &Scratch,
    ) -> Result<usize> {
        let root = canonical(&self.config.root, Stage::PagesRendered)?;
        let pages_dir = scratch.pages();
        let kinds = self.config.page_order.kinds();

        let mut sequence: usize = 0;
        let mut every = Every::new(Duration::from_secs(5));
        for (index, frame) in frames.iter().enumerate() {
            self.check_termination(Stage::PagesRendered)?;

            let timestamp = format_elapsed(frame_timestamp(index, frames.len(), duration));
            let image_src = image_source(&root, frame)?;

            for kind in kinds {
                let output = pages_dir.join(format!("page_{sequence}.pdf"));
                let page = match kind {
                    PageKind::Image => Page::image(
                        &self.config.page_template,
                        output,
                        &image_src,
                        &timestamp,
                        &self.config.geometry,
                    ),
                    PageKind::Blank => Page::blank(
                        &self.config.blank_template,
                        output,
                        &timestamp,
                        &self.config.geometry,
                    ),
                };
                log::debug!("Rendering page {} ({:?}) at {}", sequence, kind, timestamp);
                self.renderer.render(&root, &page)?;
                sequence += 1;
            }

            every.perform(|| {
                log::info!("Rendered {} of {} frames", index + 1, frames.len())
            });
        }

        Ok(sequence)
    }

    fn check_termination(&self, stage: Stage) -> Result<()> {
        if self.cookie.is_terminating() {
            log::warn!("Termination signal received");
            return Err(Error::Interrupted(stage));
        }
        Ok(())
    }
}

fn reached(stage: Stage) {
    log::info!("Finished {}", stage);
}

/// Seconds into the video of the frame at `index` (0-based), when `count` frames were
/// sampled evenly from `duration` seconds.
pub fn frame_timestamp(index: usize, count: usize, duration: f64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    duration * index as f64 / count as f64
}

/// The upscaled counterpart of every frame, which all must exist.
fn upscaled_frames(frames: &[PathBuf], upscaled_dir: &Path) -> Result<Vec<PathBuf>> {
    frames
        .iter()
        .map(|frame| {
            let upscaled = frame
                .file_name()
                .map(|name| upscaled_dir.join(name))
                .filter(|path| path.is_file());
            upscaled.ok_or_else(|| Error::UpscaleFailed {
                image: frame.clone(),
                source: "the upscaler did not produce an image".into(),
            })
        })
        .collect()
}

/// How a template finds the frame, relative to the project root.
fn image_source(root: &Path, frame: &Path) -> Result<String> {
    let frame = canonical(frame, Stage::PagesRendered)?;
    root_relative(root, &frame).ok_or_else(|| Error::OutsideRoot {
        stage: Stage::PagesRendered,
        path: frame.clone(),
        root: root.to_owned(),
    })
}
