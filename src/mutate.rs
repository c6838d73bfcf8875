//! Payload replacement inside a parsed archive.
//!
//! Replacement files are matched to entries by bare file name (no
//! directories), against either the stored entry name or the name it is
//! extracted under.  A file with no matching entry is reported and skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::archive::DrpArchive;

/// One payload swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub name:   String,
    pub before: usize,
    pub after:  usize,
}

#[derive(Debug, Default)]
pub struct ReplaceReport {
    pub replaced:  Vec<Replacement>,
    /// Inputs that matched no entry.
    pub unmatched: Vec<PathBuf>,
}

/// Overwrite the payload of the entry called `name`.  Returns `None` when no
/// entry matches; the archive is untouched in that case.
pub fn replace_entry(archive: &mut DrpArchive, name: &str, data: Vec<u8>) -> Option<Replacement> {
    let entry = archive.entry_mut(name)?;
    let after = data.len();
    let before = entry.set_data(data).len();
    let name = entry.name().to_owned();

    if before == after {
        info!("Replaced: {name}");
    } else {
        info!("Replaced: {name} {before}->{after}");
    }
    Some(Replacement { name, before, after })
}

/// Replace every entry named by one of `paths` with that file's contents.
/// Only I/O errors on a matched file abort the batch.
pub fn replace_files<P: AsRef<Path>>(archive: &mut DrpArchive, paths: &[P]) -> io::Result<ReplaceReport> {
    let mut report = ReplaceReport::default();
    for path in paths {
        let path = path.as_ref();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "replacement has no usable file name");
            report.unmatched.push(path.to_path_buf());
            continue;
        };
        if archive.entry(name).is_none() {
            warn!("Unable to find file in the input archive: {name}");
            report.unmatched.push(path.to_path_buf());
            continue;
        }

        let data = fs::read(path)?;
        report.replaced.extend(replace_entry(archive, name, data));
    }
    Ok(report)
}

/// Expand a replacement source: a file stands for itself, a directory for
/// the regular files directly inside it (sorted by name).
pub fn replacement_sources(source: &Path) -> io::Result<Vec<PathBuf>> {
    if !source.is_dir() {
        return Ok(vec![source.to_path_buf()]);
    }
    let mut files = Vec::new();
    for item in fs::read_dir(source)? {
        let item = item?;
        if item.file_type()?.is_file() {
            files.push(item.path());
        }
    }
    files.sort();
    Ok(files)
}
