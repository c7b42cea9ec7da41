//! Transient working-set semantics for build scripts.
//!
//! Files a build touches live in a private working directory and are
//! thrown away when the build ends; only files explicitly committed
//! with [`Workset::save`] travel back to the requester. Materialization
//! and commit both go through an [`Upstream`], the engine's side of the
//! session's file channel.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

/// The engine-facing side of the file channel: fetches a file the
/// script asked for and pushes a committed file back to the requester.
pub trait Upstream {
    /// Produces the content of `name` from the uploaded bundle.
    fn fetch(&mut self, name: &str) -> io::Result<Vec<u8>>;
    /// Delivers committed content back to the requester.
    fn commit(&mut self, name: &str, content: &[u8]) -> io::Result<()>;
}

/// How a script opens a working-set file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read only.
    Read,
    /// Read and write in place.
    Edit,
}

/// Errors from working-set operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorksetError {
    /// Filesystem or upstream failure on a named file.
    #[error("working set i/o on {name}: {source}")]
    Io {
        /// File the operation targeted.
        name: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The path was committed earlier in this build.
    #[error("{name} was already committed in this build")]
    AlreadyCommitted {
        /// The twice-committed path.
        name: String,
    },

    /// Commit of a path with nothing on disk behind it.
    #[error("{name} does not exist in the working set")]
    Missing {
        /// The absent path.
        name: String,
    },

    /// The name tries to address something outside the working set.
    #[error("{name} escapes the working set")]
    Escapes {
        /// The rejected name.
        name: String,
    },
}

/// One build's transient file namespace.
///
/// Edits are transient: anything not committed is discarded with the
/// working directory at session end. A path commits at most once per
/// build; a second [`Workset::save`] is rejected.
#[derive(Debug)]
pub struct Workset<U> {
    /// The build's private working directory.
    root: PathBuf,
    /// Engine-side file channel.
    upstream: U,
    /// Paths already committed this build.
    committed: HashSet<String>,
}

impl<U: Upstream> Workset<U> {
    /// Creates a working set rooted at `root`, which the engine owns
    /// and removes when the build ends.
    pub fn new(root: impl Into<PathBuf>, upstream: U) -> Self {
        Self {
            root: root.into(),
            upstream,
            committed: HashSet::new(),
        }
    }

    /// The working directory scripts also reach with ordinary file I/O.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens `name`, materializing it from upstream first if it is not
    /// yet present. The returned [`File`] closes on every exit path.
    pub fn load(&mut self, name: &str, mode: Mode) -> Result<File, WorksetError> {
        let path = self.resolve(name)?;
        if !path.exists() {
            let bytes = self.upstream.fetch(name).map_err(|e| io_error(name, e))?;
            std::fs::write(&path, bytes).map_err(|e| io_error(name, e))?;
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if mode == Mode::Edit {
            options.write(true);
        }
        options.open(&path).map_err(|e| io_error(name, e))
    }

    /// Commits the current on-disk content of `name` back to the
    /// requester. Each path commits at most once per build; content is
    /// whatever is on disk, whether it got there through [`Self::load`]
    /// or ordinary file I/O.
    pub fn save(&mut self, name: &str) -> Result<(), WorksetError> {
        let path = self.resolve(name)?;
        if self.committed.contains(name) {
            return Err(WorksetError::AlreadyCommitted {
                name: name.to_owned(),
            });
        }

        let content = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WorksetError::Missing {
                    name: name.to_owned(),
                });
            }
            Err(e) => return Err(io_error(name, e)),
        };

        self.upstream
            .commit(name, &content)
            .map_err(|e| io_error(name, e))?;
        self.committed.insert(name.to_owned());
        Ok(())
    }

    /// Maps a script-supplied name into the working directory,
    /// rejecting traversal.
    fn resolve(&self, name: &str) -> Result<PathBuf, WorksetError> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(WorksetError::Escapes {
                name: name.to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }
}

/// Tags a filesystem or upstream failure with the file it concerned.
fn io_error(name: &str, source: io::Error) -> WorksetError {
    WorksetError::Io {
        name: name.to_owned(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;

    /// In-memory upstream standing in for the session file channel.
    #[derive(Debug, Default)]
    struct MemUpstream {
        bundle: HashMap<String, Vec<u8>>,
        committed: Vec<(String, Vec<u8>)>,
        fetches: usize,
    }

    impl Upstream for MemUpstream {
        fn fetch(&mut self, name: &str) -> io::Result<Vec<u8>> {
            self.fetches += 1;
            self.bundle
                .get(name)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_owned()))
        }

        fn commit(&mut self, name: &str, content: &[u8]) -> io::Result<()> {
            self.committed.push((name.to_owned(), content.to_vec()));
            Ok(())
        }
    }

    fn workset_with(dir: &Path, name: &str, content: &[u8]) -> Workset<MemUpstream> {
        let mut upstream = MemUpstream::default();
        upstream.bundle.insert(name.to_owned(), content.to_vec());
        Workset::new(dir, upstream)
    }

    #[test]
    fn load_materializes_then_reads_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "testfile.txt", b"hi there");

        let mut file = ws.load("testfile.txt", Mode::Read).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hi there");
        assert_eq!(ws.upstream.fetches, 1);
    }

    #[test]
    fn load_of_present_file_skips_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("testfile.txt"), b"hi there").unwrap();
        let mut ws = workset_with(dir.path(), "testfile.txt", b"stale copy");

        let mut file = ws.load("testfile.txt", Mode::Read).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hi there");
        assert_eq!(ws.upstream.fetches, 0);
    }

    #[test]
    fn save_commits_exactly_the_mutated_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "testfile.txt", b"hi there");

        {
            let mut file = ws.load("testfile.txt", Mode::Edit).unwrap();
            file.seek(SeekFrom::End(0)).unwrap();
            file.write_all(b", friend").unwrap();
        }
        ws.save("testfile.txt").unwrap();

        assert_eq!(
            ws.upstream.committed,
            vec![("testfile.txt".to_owned(), b"hi there, friend".to_vec())]
        );
    }

    #[test]
    fn uncommitted_edits_never_reach_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "testfile.txt", b"hi there");
        {
            let mut file = ws.load("testfile.txt", Mode::Edit).unwrap();
            file.write_all(b"scribble").unwrap();
        }
        assert!(ws.upstream.committed.is_empty());
    }

    #[test]
    fn second_commit_of_a_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "testfile.txt", b"hi there");
        ws.load("testfile.txt", Mode::Read).unwrap();

        ws.save("testfile.txt").unwrap();
        let err = ws.save("testfile.txt").unwrap_err();
        assert!(matches!(err, WorksetError::AlreadyCommitted { .. }));
        assert_eq!(ws.upstream.committed.len(), 1);
    }

    #[test]
    fn save_captures_files_written_without_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "unused", b"");

        std::fs::write(dir.path().join("out.bit"), [0xAA, 0x55]).unwrap();
        ws.save("out.bit").unwrap();
        assert_eq!(
            ws.upstream.committed,
            vec![("out.bit".to_owned(), vec![0xAA, 0x55])]
        );
    }

    #[test]
    fn save_of_an_absent_path_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "unused", b"");
        assert!(matches!(
            ws.save("nothing.txt"),
            Err(WorksetError::Missing { .. })
        ));
    }

    #[test]
    fn traversal_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workset_with(dir.path(), "unused", b"");
        for name in ["../escape", "/etc/passwd", ""] {
            assert!(matches!(
                ws.load(name, Mode::Read),
                Err(WorksetError::Escapes { .. })
            ));
        }
    }
}
