//! Engine-side supervisory timeout for one build.
//!
//! The watchdog runs in the engine process, so it fires even when the
//! build script is hung, ignoring signals, or externally suspended —
//! the liveness guarantee the engine owes every session regardless of
//! what the script does with its own alarm. Expiry kills the build's
//! whole process group; SIGKILL delivery does not require the target
//! to be running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// A running supervisory timer over one build's process group.
#[derive(Debug)]
pub struct Watchdog {
    /// Signals the timer thread to stand down.
    disarm: Sender<()>,
    /// Set when the limit was hit and the group was killed.
    fired: Arc<AtomicBool>,
    /// The timer thread itself.
    timer: thread::JoinHandle<()>,
}

impl Watchdog {
    /// Starts supervising `pgid`; after `limit` the whole group is
    /// SIGKILLed.
    pub fn spawn(pgid: Pid, limit: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let (tx, rx) = mpsc::channel::<()>();

        let timer = thread::spawn(move || {
            if rx.recv_timeout(limit) == Err(RecvTimeoutError::Timeout) {
                flag.store(true, Ordering::SeqCst);
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        });

        Self {
            disarm: tx,
            fired,
            timer,
        }
    }

    /// Stops the watchdog after the build finished on its own; returns
    /// whether it had already fired.
    pub fn disarm(self) -> bool {
        // Either the timer sees the disarm, or it already fired; both
        // end the thread promptly.
        let _ = self.disarm.send(());
        let _ = self.timer.join();
        self.fired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::Command;
    use std::time::Instant;

    use nix::sys::signal::kill;

    use super::*;

    #[test]
    fn suspended_build_is_killed_within_the_bound() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(child.id() as i32);

        // Simulate a wedged build: suspend it, then let the watchdog
        // run out.
        kill(pgid, Signal::SIGSTOP).unwrap();
        let dog = Watchdog::spawn(pgid, Duration::from_millis(100));

        let start = Instant::now();
        let status = child.wait().unwrap();
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "watchdog did not fire in time"
        );
        assert_eq!(status.signal(), Some(libc_sigkill()));
        assert!(dog.disarm());
    }

    #[test]
    fn disarmed_watchdog_spares_the_build() {
        let mut child = Command::new("true").process_group(0).spawn().unwrap();
        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(child.id() as i32);

        let dog = Watchdog::spawn(pgid, Duration::from_secs(30));
        let status = child.wait().unwrap();
        assert!(status.success());
        assert!(!dog.disarm());
    }

    fn libc_sigkill() -> i32 {
        Signal::SIGKILL as i32
    }
}
