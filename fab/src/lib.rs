//! Client for driving interactive builds on a remote sandboxed engine.
//!
//! `fab` packages local source files into a signed bundle, opens a
//! mutually authenticated TLS connection to the build engine, and runs
//! an interactive session over it: the bundle goes up, captured build
//! output and result artifacts come back, and queued input lines are
//! released one at a time as the engine asks for them.
//!
//! # Quick start — one remote build
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! use fab::{BuildRequest, Config, SessionEvent};
//!
//! # async fn demo() -> fab::Result<()> {
//! let config = Config::load(Path::new("fab.json"))?;
//! let request = BuildRequest {
//!     script: PathBuf::from("synth.py"),
//!     files: vec![PathBuf::from("top.v")],
//!     input: vec![],
//!     artifact_dir: PathBuf::from("."),
//! };
//! let transcript = fab::run_build(&config, &request, |event| {
//!     if let SessionEvent::Line(line) = event {
//!         println!("{line}");
//!     }
//! })
//! .await?;
//! # let _ = transcript;
//! # Ok(())
//! # }
//! ```

mod bundle;
mod channel;
mod config;
mod error;
mod harness;
mod session;

pub use bundle::{BUNDLE_NAME, SCRIPT_NAME, build_bundle, verify_bundle, write_bundle};
pub use channel::{ChannelReader, ChannelWriter, SecureChannel, close};
pub use config::Config;
pub use error::{CAPACITY_MARKER, Error, Result};
pub use fab_proto::{Limits, Message};
pub use harness::{BuildRequest, RETRY_DELAY, run_build};
pub use session::{Session, SessionEvent, SessionOutcome};
