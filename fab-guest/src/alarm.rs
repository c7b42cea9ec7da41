//! Script-side build timeout: a cancellable single-shot deadline.
//!
//! Unlike a process-wide alarm signal, each [`Alarm`] owns its own
//! timer, so independent deadlines coexist and arming one never
//! clobbers another. This only protects a build against its own
//! blocking waits; the engine's watchdog covers everything else.

#![allow(clippy::print_stderr)]

use std::process;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// An armed build deadline.
///
/// On expiry the process prints a diagnostic and exits with a nonzero
/// status immediately. Dropping the handle disarms, so bind it for as
/// long as the guarded wait runs and call [`Alarm::cancel`] (or let it
/// fall out of scope) once the wait completes.
#[must_use = "dropping an Alarm disarms it"]
#[derive(Debug)]
pub struct Alarm {
    /// Dropping this end disarms the timer thread.
    _disarm: Sender<()>,
}

impl Alarm {
    /// Arms a deadline `limit` from now.
    pub fn arm(limit: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        thread::spawn(move || {
            // Disconnection is the disarm signal; only a true timeout
            // fires.
            if rx.recv_timeout(limit) == Err(RecvTimeoutError::Timeout) {
                eprintln!("timeout of {}s expired", limit.as_secs());
                process::exit(1);
            }
        });
        Self { _disarm: tx }
    }

    /// Disarms the deadline before it fires.
    pub fn cancel(self) {}
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    #[test]
    fn cancelled_alarm_does_not_fire() {
        let alarm = Alarm::arm(Duration::from_millis(20));
        alarm.cancel();
        // Were the deadline still armed, this sleep would end the test
        // process with a nonzero status.
        sleep(Duration::from_millis(80));
    }

    #[test]
    fn dropping_the_guard_disarms() {
        {
            let _alarm = Alarm::arm(Duration::from_millis(20));
        }
        sleep(Duration::from_millis(80));
    }

    #[test]
    fn independent_alarms_coexist() {
        let first = Alarm::arm(Duration::from_secs(30));
        let second = Alarm::arm(Duration::from_secs(30));
        second.cancel();
        first.cancel();
    }
}
