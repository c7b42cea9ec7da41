//! Build script execution under engine supervision.
//!
//! The script runs in its own process group inside the working
//! directory, with captured stdout streamed line by line to the caller
//! (who forwards it over the session). The engine watchdog bounds the
//! whole run; a fired watchdog is reported, not an I/O error.

use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use nix::unistd::Pid;

use crate::watchdog::Watchdog;

/// How a supervised build run ended.
#[derive(Debug)]
pub struct RunOutcome {
    /// Exit status of the script process.
    pub status: ExitStatus,
    /// Whether the engine watchdog had to kill the build.
    pub timed_out: bool,
}

impl RunOutcome {
    /// A build succeeded only if it exited zero on its own.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Runs `script` inside `workdir`, streaming each stdout line to
/// `on_line`, bounded by a watchdog of `limit`.
pub fn run_script(
    script: &Path,
    workdir: &Path,
    limit: Duration,
    mut on_line: impl FnMut(&str),
) -> io::Result<RunOutcome> {
    use std::os::unix::process::CommandExt;

    let mut child = Command::new(script)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;

    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(child.id() as i32);
    let dog = Watchdog::spawn(pgid, limit);

    // Piped stdout closes when the group dies, so this drains even for
    // a build the watchdog had to kill.
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            match line {
                Ok(line) => on_line(&line),
                Err(_) => break,
            }
        }
    }

    let status = child.wait()?;
    let timed_out = dog.disarm();
    Ok(RunOutcome { status, timed_out })
}
