use std::{io, path::PathBuf};

use flipbook_common::utils::numbered::UnnumberedError;

use crate::{command::CommandError, pipeline::Stage};

pub type Result<T> = std::result::Result<T, Error>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("could not set up the working directory at '{}'", .path.display())]
    ScratchSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not probe the duration of '{}'", .video.display())]
    ProbeFailed {
        video: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("the probe output for '{}' has no duration", .video.display())]
    MalformedProbeOutput { video: PathBuf },

    #[error("could not extract frames from '{}'", .video.display())]
    ExtractionFailed {
        video: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("no frames were extracted from '{}'", .video.display())]
    NoFrames { video: PathBuf },

    #[error("bad response ({status}) when upscaling '{}': {body}", .image.display())]
    BadUpscaleResponse {
        image: PathBuf,
        status: u16,
        body: String,
    },

    #[error("malformed response when upscaling '{}': {reason}", .image.display())]
    MalformedUpscaleResponse { image: PathBuf, reason: String },

    #[error("could not upscale '{}'", .image.display())]
    UpscaleFailed {
        image: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("'{}' is not inside the root '{}'", .path.display(), .root.display())]
    OutsideRoot {
        stage: Stage,
        path: PathBuf,
        root: PathBuf,
    },

    #[error("could not render '{}' into '{}'", .template.display(), .output.display())]
    RenderFailed {
        template: PathBuf,
        output: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("could not merge into '{}' because of '{}'", .output.display(), .path.display())]
    MergeFailed {
        output: PathBuf,
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("{context}")]
    Io {
        stage: Stage,
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("found a stray file")]
    Unnumbered {
        stage: Stage,
        #[source]
        source: UnnumberedError,
    },

    #[error("interrupted by a termination signal")]
    Interrupted(Stage),
}

impl Error {
    /// The stage of the pipeline this error aborted.
    pub fn stage(&self) -> Stage {
        match self {
            Error::Configuration(_) => Stage::Init,
            Error::ScratchSetup { .. } => Stage::ScratchCreated,
            Error::ProbeFailed { .. }
            | Error::MalformedProbeOutput { .. }
            | Error::ExtractionFailed { .. }
            | Error::NoFrames { .. } => Stage::FramesExtracted,
            Error::BadUpscaleResponse { .. }
            | Error::MalformedUpscaleResponse { .. }
            | Error::UpscaleFailed { .. } => Stage::Upscaled,
            Error::RenderFailed { .. } => Stage::PagesRendered,
            Error::MergeFailed { .. } => Stage::Merged,
            Error::Io { stage, .. }
            | Error::OutsideRoot { stage, .. }
            | Error::Unnumbered { stage, .. }
            | Error::Interrupted(stage) => *stage,
        }
    }

    pub(crate) fn io(stage: Stage, context: impl ToString) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Io {
            stage,
            context: context.to_string(),
            source,
        }
    }
}
