//! Build bundle packaging: file list → one signed archive blob.
//!
//! Layout: `[u64 big-endian signature length][signature][gzip tar]`.
//! The signature slot carries a SHA-256 digest of the payload; richer
//! signing schemes fit the same slot as long as they respect
//! [`Limits::max_signature_size`]. The engine re-derives the digest to
//! reject corrupt uploads.

use std::fs;
use std::path::{Path, PathBuf};

use fab_proto::Limits;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Name every bundle travels under in the opening `SENDFILE`.
pub const BUNDLE_NAME: &str = "build.bundle";

/// Entry name the build script is stored under; the engine runs this
/// entry, whatever the script was called locally.
pub const SCRIPT_NAME: &str = "build.py";

/// Packages a build script plus auxiliary files into a signed blob.
pub fn build_bundle(script: &Path, files: &[PathBuf], limits: &Limits) -> Result<Vec<u8>> {
    let total = 1 + files.len() as u64;
    if total > limits.max_archive_files {
        return Err(bundle_error(
            script,
            format!(
                "{total} files exceed the {} file bundle limit",
                limits.max_archive_files
            ),
        ));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_entry(&mut builder, script, SCRIPT_NAME, limits)?;
    for file in files {
        let name = entry_name(file)?;
        append_entry(&mut builder, file, &name, limits)?;
    }
    let payload = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| bundle_error(script, e.to_string()))?;

    let signature = Sha256::digest(&payload);
    if signature.len() as u64 > limits.max_signature_size {
        return Err(bundle_error(
            script,
            format!(
                "signature of {} bytes exceeds the {} byte limit",
                signature.len(),
                limits.max_signature_size
            ),
        ));
    }

    let mut blob = Vec::with_capacity(8 + signature.len() + payload.len());
    blob.extend_from_slice(&(signature.len() as u64).to_be_bytes());
    blob.extend_from_slice(&signature);
    blob.extend_from_slice(&payload);

    if blob.len() as u64 > limits.max_file_size {
        return Err(bundle_error(
            script,
            format!(
                "bundle of {} bytes exceeds the {} byte upload limit",
                blob.len(),
                limits.max_file_size
            ),
        ));
    }
    Ok(blob)
}

/// [`build_bundle`], written to `out`; returns `out` for callers that
/// hand the bundle path on.
pub fn write_bundle(
    out: &Path,
    script: &Path,
    files: &[PathBuf],
    limits: &Limits,
) -> Result<PathBuf> {
    let blob = build_bundle(script, files, limits)?;
    fs::write(out, blob).map_err(|e| bundle_error(out, e.to_string()))?;
    Ok(out.to_owned())
}

/// Checks a bundle blob's signature and structure against `limits`.
pub fn verify_bundle(blob: &[u8], limits: &Limits) -> Result<()> {
    let fail = |reason: &str| bundle_error(Path::new(BUNDLE_NAME), reason.to_owned());

    let Some(prefix) = blob.get(..8) else {
        return Err(fail("blob too short for a signature header"));
    };
    #[allow(clippy::unwrap_used)] // length checked above
    let sig_len = u64::from_be_bytes(prefix.try_into().unwrap());
    if sig_len > limits.max_signature_size {
        return Err(fail("declared signature exceeds the size limit"));
    }
    #[allow(clippy::cast_possible_truncation)]
    let sig_end = 8 + sig_len as usize;
    let Some(signature) = blob.get(8..sig_end) else {
        return Err(fail("blob too short for its declared signature"));
    };
    let payload = &blob[sig_end..];

    if Sha256::digest(payload).as_slice() != signature {
        return Err(fail("signature does not match the archive"));
    }

    let mut archive = tar::Archive::new(GzDecoder::new(payload));
    let entries = archive
        .entries()
        .map_err(|e| fail(&e.to_string()))?
        .count() as u64;
    if entries > limits.max_archive_files {
        return Err(fail("archive exceeds the bundle file limit"));
    }
    Ok(())
}

/// Appends one file, enforcing the per-entry name and size bounds.
fn append_entry(
    builder: &mut tar::Builder<GzEncoder<Vec<u8>>>,
    path: &Path,
    name: &str,
    limits: &Limits,
) -> Result<()> {
    if name.len() as u64 > limits.max_name_size || !name.is_ascii() {
        return Err(bundle_error(
            path,
            format!("entry name {name:?} is non-ascii or too long"),
        ));
    }
    let meta = fs::metadata(path).map_err(|e| bundle_error(path, e.to_string()))?;
    if meta.len() > limits.max_file_size {
        return Err(bundle_error(
            path,
            format!(
                "{} bytes exceed the {} byte per-file limit",
                meta.len(),
                limits.max_file_size
            ),
        ));
    }
    builder
        .append_path_with_name(path, name)
        .map_err(|e| bundle_error(path, e.to_string()))
}

/// An auxiliary file is archived under its final path component.
fn entry_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| bundle_error(path, "file has no usable name".to_owned()))
}

/// Maps a packaging failure onto the file that caused it.
fn bundle_error(path: &Path, reason: String) -> Error {
    Error::Bundle {
        path: path.to_owned(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn scratch_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn bundle_carries_script_and_aux_files() {
        let dir = tempfile::tempdir().unwrap();
        let script = scratch_file(dir.path(), "synth.py", b"save('out.bit')\n");
        let aux = scratch_file(dir.path(), "top.v", b"module top; endmodule\n");
        let limits = Limits::default();

        let blob = build_bundle(&script, &[aux], &limits).unwrap();
        verify_bundle(&blob, &limits).unwrap();

        // The script is renamed to the fixed entry the engine executes.
        let sig_len = u64::from_be_bytes(blob[..8].try_into().unwrap()) as usize;
        let mut archive = tar::Archive::new(GzDecoder::new(&blob[8 + sig_len..]));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["build.py".to_owned(), "top.v".to_owned()]);
    }

    #[test]
    fn tampered_bundle_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let script = scratch_file(dir.path(), "build.py", b"print('hi')\n");
        let limits = Limits::default();

        let mut blob = build_bundle(&script, &[], &limits).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        let err = verify_bundle(&blob, &limits).unwrap_err();
        assert!(err.to_string().contains("signature"), "{err}");
    }

    #[test]
    fn file_count_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let script = scratch_file(dir.path(), "build.py", b"pass\n");
        let files: Vec<PathBuf> = (0..3)
            .map(|i| scratch_file(dir.path(), &format!("f{i}.txt"), b"x"))
            .collect();
        let limits = Limits {
            max_archive_files: 3,
            ..Limits::default()
        };
        let err = build_bundle(&script, &files, &limits).unwrap_err();
        assert!(matches!(err, Error::Bundle { .. }));
    }

    #[test]
    fn oversized_member_rejected_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = scratch_file(dir.path(), "build.py", b"pass\n");
        let big = scratch_file(dir.path(), "big.bin", &[0u8; 64]);
        let limits = Limits {
            max_file_size: 32,
            ..Limits::default()
        };
        let err = build_bundle(&script, &[big.clone()], &limits).unwrap_err();
        assert!(err.to_string().contains("big.bin"), "{err}");
    }

    #[test]
    fn bundle_reads_back_through_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let script = scratch_file(dir.path(), "build.py", b"content here\n");
        let blob = build_bundle(&script, &[], &Limits::default()).unwrap();

        let sig_len = u64::from_be_bytes(blob[..8].try_into().unwrap()) as usize;
        let mut archive = tar::Archive::new(GzDecoder::new(&blob[8 + sig_len..]));
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "content here\n");
    }
}
