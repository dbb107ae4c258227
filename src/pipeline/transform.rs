//! Local repackaging of an exported mailbox archive.
//!
//! The export is a gzipped tar of the folder tree. The import wants the
//! messages only, so they are pulled out of the tree into one flat staging
//! directory and packed again.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use super::WorkPaths;
use crate::error::{RecoveryError, Result};

fn failed(action: &str, path: &Path) -> impl FnOnce(io::Error) -> RecoveryError {
    let context = format!("{} {}", action, path.display());
    move |err| RecoveryError::Transform(format!("{context}: {err}"))
}

/// Unpack the export, stage every message with `extension`, and write the
/// import archive. Returns the number of staged messages.
///
/// `cancel` is polled between files; once set, the work stops with an error
/// and leaves no import archive behind.
pub fn repackage_export(paths: &WorkPaths, extension: &str, cancel: &AtomicBool) -> Result<usize> {
    check_cancelled(cancel)?;
    unpack(&paths.export_file, &paths.extract_dir)?;
    let staged = stage_messages(&paths.extract_dir, &paths.staging_dir, extension, cancel)?;
    if staged > 0 {
        if let Err(err) = pack(&paths.staging_dir, &paths.import_file, cancel) {
            let _ = fs::remove_file(&paths.import_file);
            return Err(err);
        }
    }
    Ok(staged)
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        return Err(RecoveryError::Transform("repackaging cancelled".to_string()));
    }
    Ok(())
}

fn unpack(archive: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination).map_err(failed("create", destination))?;
    let file = File::open(archive).map_err(failed("open", archive))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(destination)
        .map_err(failed("decompress", archive))
}

fn stage_messages(
    source: &Path,
    staging: &Path,
    extension: &str,
    cancel: &AtomicBool,
) -> Result<usize> {
    fs::create_dir_all(staging).map_err(failed("create", staging))?;

    let mut staged = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        check_cancelled(cancel)?;
        let entry = entry.map_err(|err| RecoveryError::Transform(err.to_string()))?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), extension) {
            continue;
        }
        let target = unique_target(staging, entry.path());
        fs::rename(entry.path(), &target).map_err(failed("move", entry.path()))?;
        staged += 1;
    }
    tracing::debug!("Staged {} message(s) into {}", staged, staging.display());
    Ok(staged)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// `staging/<name>`, or `staging/<stem>-<n>.<ext>` when the name is taken.
fn unique_target(staging: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let candidate = staging.join(&name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1..)
        .map(|n| staging.join(format!("{stem}-{n}.{ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn pack(staging: &Path, output: &Path, cancel: &AtomicBool) -> Result<()> {
    let file = File::create(output).map_err(failed("create", output))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let mut names: Vec<_> = fs::read_dir(staging)
        .map_err(failed("read", staging))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect();
    names.sort();

    for name in names {
        check_cancelled(cancel)?;
        builder
            .append_path_with_name(staging.join(&name), &name)
            .map_err(failed("add to archive", &staging.join(&name)))?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(failed("finish", output))?;
    Ok(())
}
