//! Sandbox runtime contract for build scripts on a fab worker.
//!
//! The engine materializes each build inside a private, transient
//! working set: scripts [`load`](Workset::load) files out of the
//! uploaded bundle, edit them freely, and [`save`](Workset::save) the
//! ones that should travel back — everything else vanishes with the
//! session. Two independent timeout layers bound every build: the
//! script's own [`Alarm`] and the engine [`Watchdog`], which fires even
//! when the script is suspended or wedged. Network egress is limited to
//! the control channel by [`EgressPolicy`].

mod alarm;
mod netpolicy;
#[cfg(unix)]
mod runner;
#[cfg(unix)]
mod watchdog;
mod workset;

pub use alarm::Alarm;
pub use netpolicy::EgressPolicy;
#[cfg(unix)]
pub use runner::{RunOutcome, run_script};
#[cfg(unix)]
pub use watchdog::Watchdog;
pub use workset::{Mode, Upstream, Workset, WorksetError};
