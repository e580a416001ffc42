use std::time::{Duration, Instant};

/// Formats elapsed seconds as `HH:MM:SS:CC`, with centiseconds last. This is a plain
/// decomposition of the elapsed time, the hours are not wrapped at 24. Negative and NaN
/// inputs are treated as zero.
pub fn format_elapsed(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;

    let hours = centis / 360_000;
    let rest = centis % 360_000;
    let minutes = rest / 6_000;
    let rest = rest % 6_000;
    let secs = rest / 100;
    let centis = rest % 100;

    format!("{hours:02}:{minutes:02}:{secs:02}:{centis:02}")
}

/// Parses a clock reading like `HH:MM:SS.CC`, as printed by ffmpeg, into seconds. The
/// fraction may have any number of digits.
pub fn parse_clock(clock: &str) -> Option<f64> {
    let mut parts = clock.trim().split(':');
    let hours: u64 = parse_digits(parts.next()?)?;
    let minutes: u64 = parse_digits(parts.next()?)?;
    let seconds = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    let whole: u64 = parse_digits(whole)?;
    let fraction: f64 = if fraction.is_empty() {
        0.0
    } else {
        parse_digits::<u64>(fraction)?;
        format!("0.{fraction}").parse().ok()?
    };

    Some((hours * 3600 + minutes * 60 + whole) as f64 + fraction)
}

fn parse_digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Runs something at most once every `every`, for progress logs and such.
pub struct Every {
    every: Duration,
    last: Instant,
}

impl Every {
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            last: Instant::now(),
        }
    }

    pub fn perform(&mut self, f: impl FnOnce()) {
        let now = Instant::now();
        if now - self.last >= self.every {
            self.last = now;
            f()
        }
    }
}
