//! Running the external tools everything is delegated to.

use std::{
    ffi::OsString,
    fmt, io,
    process::{Command, ExitStatus, Output, Stdio},
};

/// How many lines of stderr to keep in an error
const STDERR_TAIL_LINES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to start '{}'", .program.to_string_lossy())]
    Spawn {
        program: OsString,
        #[source]
        source: io::Error,
    },
    #[error("'{}' failed ({status}){}", .program.to_string_lossy(), StderrTail(.stderr))]
    Status {
        program: OsString,
        status: ExitStatus,
        stderr: String,
    },
}

struct StderrTail<'a>(&'a str);

impl fmt::Display for StderrTail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.trim().is_empty() {
            return Ok(());
        }
        let lines: Vec<&str> = self.0.trim_end().lines().collect();
        let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
        write!(f, ", stderr:\n{}", tail.join("\n"))
    }
}

/// Runs the command to completion and captures its output, regardless of exit status.
pub fn capture(cmd: &mut Command) -> Result<Output, CommandError> {
    log::info!("Running command: {cmd:?}");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|source| CommandError::Spawn {
            program: cmd.get_program().to_owned(),
            source,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        log::debug!("stderr of {:?}:\n{}", cmd.get_program(), stderr.trim_end());
    }

    Ok(output)
}

/// Like [`capture`], but a non-zero exit status is an error.
pub fn run(cmd: &mut Command) -> Result<Output, CommandError> {
    let output = capture(cmd)?;
    if !output.status.success() {
        return Err(CommandError::Status {
            program: cmd.get_program().to_owned(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}
