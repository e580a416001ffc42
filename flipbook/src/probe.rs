use std::{ffi::OsString, path::Path, process::Command};

use flipbook_common::utils::time::parse_clock;

use crate::{command, Error, Result};

/// Finds out how long a video is.
pub trait DurationProbe {
    /// The duration of the video in seconds
    fn duration(&self, video: &Path) -> Result<f64>;
}

/// Reads the `Duration:` line ffmpeg prints when only given an input.
pub struct FfmpegProbe {
    program: OsString,
}

impl Default for FfmpegProbe {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegProbe {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DurationProbe for FfmpegProbe {
    fn duration(&self, video: &Path) -> Result<f64> {
        // NOTE: ffmpeg exits with an error since no output is given, so the status says
        // nothing
        let output = command::capture(
            Command::new(&self.program)
                .arg("-hide_banner")
                .arg("-nostdin")
                .arg("-i")
                .arg(video),
        )
        .map_err(|source| Error::ProbeFailed {
            video: video.to_owned(),
            source,
        })?;

        let text = String::from_utf8_lossy(&output.stderr);
        let duration = parse_duration(&text).ok_or_else(|| Error::MalformedProbeOutput {
            video: video.to_owned(),
        })?;
        log::info!("Duration of {}: {} seconds", video.display(), duration);
        Ok(duration)
    }
}

/// Finds the first `Duration: HH:MM:SS.CC,` field in ffmpeg's output and converts it to
/// seconds.
pub fn parse_duration(output: &str) -> Option<f64> {
    let field = output
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("Duration:"))?;
    let clock = field.split(',').next()?;
    parse_clock(clock)
}

#[cfg(test)]
mod test {
    use super::*;

    const FFMPEG_OUTPUT: &str = "\
Input #0, matroska,webm, from 'testvideo.mkv':
  Metadata:
    ENCODER         : Lavf60.16.100
  Duration: 00:01:10.04, start: 0.000000, bitrate: 25 kb/s
  Stream #0:0: Video: h264 (High 4:4:4 Predictive), yuv444p(progressive), 320x240
      Metadata:
        DURATION        : 00:00:10.000000000
At least one output file must be specified
";

    #[test]
    fn ffmpeg_duration() {
        let parsed = parse_duration(FFMPEG_OUTPUT).unwrap();
        assert!((parsed - 70.04).abs() < 1e-9, "{parsed}");
    }

    #[test]
    fn missing_duration() {
        assert_eq!(None, parse_duration(""));
        assert_eq!(
            None,
            parse_duration("testvideo.mkv: No such file or directory\n")
        );
        assert_eq!(
            None,
            parse_duration("  Duration: N/A, start: 0.000000, bitrate: N/A\n")
        );
    }

    #[test]
    fn probe_command_without_duration() {
        let probe = FfmpegProbe::new("true");
        let err = probe.duration(Path::new("video.mkv")).unwrap_err();
        assert!(matches!(err, Error::MalformedProbeOutput { .. }), "{err:?}");
    }

    #[test]
    fn probe_command_missing() {
        let probe = FfmpegProbe::new("surely-not-an-ffmpeg");
        let err = probe.duration(Path::new("video.mkv")).unwrap_err();
        assert!(matches!(err, Error::ProbeFailed { .. }), "{err:?}");
    }
}
