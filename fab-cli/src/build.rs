//! `fab build` — package a script, run it remotely, print the transcript.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result};
use fab::{BuildRequest, Config, SessionEvent};

/// Arguments for `fab build`.
///
/// Usage: `fab build [OPTIONS] SCRIPT [FILE...]`
#[derive(clap::Args)]
pub struct BuildArgs {
    /// Build script to run on the engine.
    script: PathBuf,

    /// Auxiliary files shipped alongside the script.
    files: Vec<PathBuf>,

    /// Client configuration file.
    #[arg(long, default_value = "fab.json")]
    config: PathBuf,

    /// Directory result artifacts are written into.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Read build input lines from stdin until EOF before starting.
    #[arg(long)]
    stdin: bool,
}

/// Runs one remote build and streams its transcript to stdout.
pub async fn run(args: BuildArgs) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let input = if args.stdin { read_input_lines()? } else { Vec::new() };

    let request = BuildRequest {
        script: args.script,
        files: args.files,
        input,
        artifact_dir: args.out_dir,
    };

    fab::run_build(&config, &request, |event| match event {
        SessionEvent::Line(line) => println!("{line}"),
        SessionEvent::Heartbeat => println!("."),
        SessionEvent::Failure(text) => eprintln!("ERROR: {text}"),
        SessionEvent::Artifact(path) => {
            tracing::info!(artifact = %path.display(), "artifact received");
        }
        _ => {}
    })
    .await?;

    Ok(())
}

/// Drains stdin so piped input can be replayed on capacity retries.
fn read_input_lines() -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in io::stdin().lock().lines() {
        lines.push(line.context("reading build input from stdin")?);
    }
    Ok(lines)
}
