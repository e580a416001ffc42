use std::{
    ffi::OsString,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use flipbook::{
    config::{Config, PageGeometry, PageOrder, UpscaleBackend, UpscaleConfig},
    pipeline::{Pipeline, Stage},
    upscale::{StabilityEngine, TargetSize, DEFAULT_STABILITY_HOST},
    Error,
};
use flipbook_common::{
    bin_common::{
        init::{init_eyre, init_logger},
        termination,
    },
    utils::fsutils::read_optional_file,
};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum UpscalerKind {
    /// A super-resolution model binary on this machine
    Local,
    /// The Stability AI API
    Stability,
}

#[derive(Parser, Debug)]
#[command()]
/// Render a video as a multipage PDF.
///
/// Frames are sampled from the video, optionally upscaled, and each one is put on a page
/// of its own with a timestamp, alternating with blank pages.
struct Cli {
    /// The path to the video file
    video: PathBuf,

    /// The height of the image in the PDF in inches
    height: f64,

    /// The width of the image in the PDF in inches
    width: f64,

    /// The margin of the image in the PDF in inches
    #[arg(long, default_value_t = 0.0)]
    margin: f64,

    /// The path to the template file for image pages
    #[arg(long, default_value = "templates/page/page.typ")]
    page_template: PathBuf,

    /// The path to the template file for blank alternate pages
    #[arg(long, default_value = "templates/page/blank.typ")]
    blank_template: PathBuf,

    /// The path to the output pdf file
    #[arg(long, short = 'o', default_value = "output.pdf")]
    output: PathBuf,

    /// The number of frames to extract per second
    #[arg(long, default_value = "20")]
    fps: NonZeroU32,

    /// The directory to save the temporary files in. Must not exist
    #[arg(long, alias = "temporary_directory", default_value = "tmp")]
    temporary_directory: PathBuf,

    /// Don't remove the temporary files when done
    #[arg(long)]
    keep_temporary_files: bool,

    /// The typst project root, defaults to the current directory. The temporary directory
    /// must be inside it
    #[arg(long)]
    root: Option<PathBuf>,

    /// Which page of each frame comes first
    #[arg(long, value_enum, default_value_t = PageOrder::ImageFirst)]
    page_order: PageOrder,

    /// Put the frames on the pages as they are
    #[arg(long)]
    disable_upscale: bool,

    /// What to upscale the frames with
    #[arg(long, value_enum, default_value_t = UpscalerKind::Local)]
    upscaler: UpscalerKind,

    /// Upscale to this width, keeping the aspect ratio
    #[arg(long)]
    upscale_width: Option<u32>,

    /// Upscale to this height, keeping the aspect ratio
    #[arg(long)]
    upscale_height: Option<u32>,

    /// The local super-resolution program
    #[arg(long, default_value = "realesrgan-ncnn-vulkan")]
    local_upscale_program: OsString,

    /// The model for the local program to use
    #[arg(long, default_value = "realesrgan-x4plus")]
    local_upscale_model: String,

    /// File containing the Stability AI API key
    #[arg(long, default_value = "stability.key")]
    credentials: PathBuf,

    /// The Stability AI upscaling engine
    #[arg(long, value_enum, default_value_t = StabilityEngine::EsrganV1X2Plus)]
    stability_engine: StabilityEngine,

    /// Where the Stability AI API is
    #[arg(long, default_value = DEFAULT_STABILITY_HOST)]
    stability_host: String,

    /// Send this many upscale requests at a time
    #[arg(long, short = 'j', default_value = "4")]
    upscale_jobs: NonZeroUsize,

    /// Give up on an upscale request after this long
    #[arg(long, default_value = "2m")]
    request_timeout: humantime::Duration,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Only log this level and above
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

impl Cli {
    fn to_config(&self) -> flipbook::Result<Config> {
        let target = TargetSize::from_options(self.upscale_width, self.upscale_height)?;

        let upscale = if self.disable_upscale {
            None
        } else {
            let backend = match self.upscaler {
                UpscalerKind::Local => UpscaleBackend::Local {
                    program: self.local_upscale_program.clone(),
                    model: self.local_upscale_model.clone(),
                },
                UpscalerKind::Stability => UpscaleBackend::Stability {
                    credentials: self.credentials.clone(),
                    engine: self.stability_engine,
                    host: self.stability_host.clone(),
                    jobs: self.upscale_jobs,
                    timeout: self.request_timeout.into(),
                },
            };
            Some(UpscaleConfig { backend, target })
        };

        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(|source| Error::Io {
                stage: Stage::Init,
                context: "failed to get the current directory".to_string(),
                source,
            })?,
        };

        Ok(Config {
            video: self.video.clone(),
            geometry: PageGeometry {
                width_in: self.width,
                height_in: self.height,
                margin_in: self.margin,
            },
            page_template: self.page_template.clone(),
            blank_template: self.blank_template.clone(),
            root,
            output: self.output.clone(),
            fps: self.fps,
            scratch_dir: self.temporary_directory.clone(),
            keep_scratch: self.keep_temporary_files,
            page_order: self.page_order,
            upscale,
        })
    }
}

fn cli_arguments() -> eyre::Result<Cli> {
    const ARGS_FILE: &str = ".flipbookrc";
    let mut args: Vec<OsString> = std::env::args_os().collect();

    if args.len() == 1 {
        if let Some(flags) = read_optional_file(ARGS_FILE)
            .wrap_err_with(|| format!("Could not read config file at: {ARGS_FILE}"))?
        {
            args.extend(
                flags
                    .split_whitespace()
                    .map(|s| std::ffi::OsStr::new(s).to_owned()),
            );
        }
    }

    Ok(Cli::parse_from(args))
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    let cli = cli_arguments()?;
    init_logger(cli.logfile.as_deref(), cli.log_level)?;

    log::debug!("CLI arguments: {cli:#?}");

    let term_cookie =
        termination::Cookie::new().wrap_err("failed to create term cookie")?;

    let result = cli
        .to_config()
        .and_then(Pipeline::new)
        .and_then(|pipeline| pipeline.with_cookie(term_cookie).run());

    match result {
        Ok(report) => {
            log::info!(
                "Rendered {} frames from {:.2} seconds of video into {} pages at {}",
                report.frames,
                report.duration,
                report.pages,
                report.output.display()
            );
            Ok(())
        }
        Err(e) => {
            let stage = e.stage();
            let report = eyre::Report::new(e);
            log::error!("The {stage} stage failed: {report:#}");
            Err(report.wrap_err(format!("failed to render {}", cli.video.display())))
        }
    }
}
