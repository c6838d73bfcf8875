//! Batch entry points: extract archives and save vaults to disk, and
//! rewrite an archive with replaced entries.
//!
//! ```no_run
//! use std::path::Path;
//! use drpvault::codec::ZstdCodec;
//! use drpvault::dump::{extract_all_archives, extract_save_dir, ExtractOptions};
//!
//! let report = extract_all_archives(Path::new("romfs"), Path::new("dump"), &ZstdCodec)?;
//! println!("{} archives, {} failed", report.succeeded.len(), report.failed.len());
//!
//! extract_save_dir(Path::new("save"), Path::new("album"), ExtractOptions::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Every directory-wide call keeps going past a failed item and reports it
//! in the returned [`BatchReport`].

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{ArchiveError, DrpArchive};
use crate::codec::Codec;
use crate::mutate::{replace_files, replacement_sources, ReplaceReport};
use crate::save::{vault_names, ChecksumStatus, SaveError, SaveFile};

/// File extension of DRPF archives on disk.
pub const ARCHIVE_EXTENSION: &str = "drp";
pub const MANIFEST_NAME: &str = "entries.json";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Input not found: {0}")]
    MissingInput(PathBuf),
    #[error("{}: {source}", .path.display())]
    Archive { path: PathBuf, source: ArchiveError },
    #[error("{}: {source}", .path.display())]
    Save { path: PathBuf, source: SaveError },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Options and reports ──────────────────────────────────────────────────────

/// Optional outputs of save extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Write `entries.json` next to the extracted entries.
    pub manifest:        bool,
    /// Write `{vault}.dec`, the whole slot decrypted.
    pub decrypted_image: bool,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Output directory of each item that succeeded.
    pub succeeded: Vec<PathBuf>,
    pub failed:    Vec<(PathBuf, DumpError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, input: PathBuf, result: Result<PathBuf, DumpError>) {
        match result {
            Ok(out) => self.succeeded.push(out),
            Err(e) => {
                warn!(input = %input.display(), error = %e, "item failed");
                self.failed.push((input, e));
            }
        }
    }
}

/// One line of `entries.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index:         usize,
    pub file:          String,
    pub magic:         u32,
    pub data_size:     u32,
    pub data_size_dup: u32,
    pub checksums:     ChecksumStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotManifest {
    pub slot:                 usize,
    pub vault:                String,
    pub magic:                u32,
    pub entry_count:          u32,
    pub encrypted_entry_size: u32,
    pub decrypted_entry_size: u32,
    pub entries:              Vec<ManifestEntry>,
}

#[derive(Debug)]
pub struct SlotReport {
    pub slot:    usize,
    pub out_dir: PathBuf,
    pub written: usize,
    pub empty:   usize,
    /// Entries that could not be decrypted; the rest of the slot is still written.
    pub failed:  Vec<(usize, SaveError)>,
}

// ── Archives ─────────────────────────────────────────────────────────────────

/// Extract every entry of `path` into `dest/{archive stem}/`.  Returns that
/// directory.
pub fn extract_archive(path: &Path, dest: &Path, codec: &dyn Codec) -> Result<PathBuf, DumpError> {
    if !path.is_file() {
        return Err(DumpError::MissingInput(path.to_path_buf()));
    }
    let archive = DrpArchive::open(path, codec).map_err(archive_error(path))?;

    info!("Dumping {} files from {}", archive.file_count(), path.display());
    let stem = path.file_stem().unwrap_or(path.as_os_str());
    let out_dir = dest.join(stem);
    fs::create_dir_all(&out_dir)?;

    let total = archive.file_count();
    for (i, entry) in archive.entries().iter().enumerate() {
        let name = entry.full_name();
        let Some(target) = contained_join(&out_dir, &name) else {
            warn!(name = %name, "entry name escapes the output directory; skipped");
            continue;
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, entry.data())?;
        debug!("\t{}/{}: {}", i + 1, total, target.display());
    }
    Ok(out_dir)
}

fn archive_error(path: &Path) -> impl FnOnce(ArchiveError) -> DumpError + '_ {
    move |source| DumpError::Archive { path: path.to_path_buf(), source }
}

/// `dir/name` when `name` is a plain relative path.
fn contained_join(dir: &Path, name: &str) -> Option<PathBuf> {
    let rel = Path::new(name);
    let plain = rel.components().all(|c| matches!(c, Component::Normal(_)));
    (plain && !name.is_empty()).then(|| dir.join(rel))
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Extract every `*.drp` below `root`.  Each archive lands under the same
/// relative directory in `dest`.  Symlinks are followed; anything the walk
/// cannot read is recorded as a failure and skipped.
pub fn extract_all_archives(root: &Path, dest: &Path, codec: &dyn Codec) -> Result<BatchReport, DumpError> {
    if !root.is_dir() {
        return Err(DumpError::MissingInput(root.to_path_buf()));
    }

    let mut report = BatchReport::default();
    let mut archives = Vec::new();
    for item in WalkDir::new(root).follow_links(true) {
        match item {
            Ok(item) if item.file_type().is_file() && is_archive(item.path()) => {
                archives.push(item.into_path());
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                report.record(path, Err(DumpError::Io(io::Error::from(e))));
            }
        }
    }
    archives.sort();

    let total = archives.len();
    let job = |(i, path): (usize, &PathBuf)| {
        info!("{}/{}: Reading and decrypting {}", i + 1, total, path.display());
        let rel = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .unwrap_or(Path::new(""));
        extract_archive(path, &dest.join(rel), codec)
    };

    #[cfg(feature = "parallel")]
    let results: Vec<Result<PathBuf, DumpError>> = {
        use rayon::prelude::*;
        archives.par_iter().enumerate().map(job).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<PathBuf, DumpError>> = archives.iter().enumerate().map(job).collect();

    for (path, result) in archives.into_iter().zip(results) {
        report.record(path, result);
    }
    Ok(report)
}

/// Replace entries of `source` from `replacement` (a file, or a directory of
/// files) and write the result to `destination`, or back over `source`.
pub fn replace_in_archive(
    source:      &Path,
    replacement: &Path,
    destination: Option<&Path>,
    codec:       &dyn Codec,
) -> Result<ReplaceReport, DumpError> {
    if !source.is_file() {
        return Err(DumpError::MissingInput(source.to_path_buf()));
    }
    if !replacement.exists() {
        return Err(DumpError::MissingInput(replacement.to_path_buf()));
    }

    let mut archive = DrpArchive::open(source, codec).map_err(archive_error(source))?;
    let files = replacement_sources(replacement)?;
    let report = replace_files(&mut archive, &files)?;

    let destination = destination.unwrap_or(source);
    archive.save(destination, codec).map_err(archive_error(destination))?;
    info!(
        replaced = report.replaced.len(),
        unmatched = report.unmatched.len(),
        "wrote {}",
        destination.display()
    );
    Ok(report)
}

// ── Save vaults ──────────────────────────────────────────────────────────────

/// Extract every present slot of a vault directory into `dest/{slot:02}/`.
/// Missing vault files are skipped.
pub fn extract_save_dir(dir: &Path, dest: &Path, options: ExtractOptions) -> Result<BatchReport, DumpError> {
    if !dir.is_dir() {
        return Err(DumpError::MissingInput(dir.to_path_buf()));
    }
    let mut report = BatchReport::default();
    for (slot, name) in vault_names().iter().enumerate() {
        let path = dir.join(name);
        if !path.is_file() {
            debug!(slot, "no vault file {name}");
            continue;
        }
        let result = extract_save_slot(&path, slot, dest, options).map(|r| r.out_dir);
        report.record(path, result);
    }
    Ok(report)
}

/// Extract the entries of one vault file.  Entry files are named by index,
/// zero-padded to the width of the entry count, with `.jpg` for carved
/// photos and `.bin` otherwise.
pub fn extract_save_slot(
    path:    &Path,
    slot:    usize,
    dest:    &Path,
    options: ExtractOptions,
) -> Result<SlotReport, DumpError> {
    if !path.is_file() {
        return Err(DumpError::MissingInput(path.to_path_buf()));
    }
    let wrap = |source| DumpError::Save { path: path.to_path_buf(), source };
    let save = SaveFile::open(path, slot).map_err(wrap)?;

    let out_dir = dest.join(format!("{slot:02}"));
    fs::create_dir_all(&out_dir)?;
    let count = save.entry_count();
    info!("Extracting {}... found ~{} files.", out_dir.display(), count);

    let digits = count.to_string().len();
    let mut report = SlotReport { slot, out_dir, written: 0, empty: 0, failed: Vec::new() };
    let mut manifest = Vec::new();

    for index in 0..count {
        let entry = match save.entry(index) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                report.empty += 1;
                continue;
            }
            Err(e) => {
                warn!(slot, index, error = %e, "entry failed");
                report.failed.push((index, e));
                continue;
            }
        };

        let checksums = entry.checksum_status();
        if !checksums.is_valid() {
            debug!(slot, index, ?checksums, "entry checksum mismatch");
        }
        let (kind, bytes) = entry.carve();
        let file = format!("{index:0digits$}.{}", kind.extension());
        fs::write(report.out_dir.join(&file), bytes)?;
        report.written += 1;

        manifest.push(ManifestEntry {
            index,
            file,
            magic: entry.magic,
            data_size: entry.data_size,
            data_size_dup: entry.data_size_dup,
            checksums,
        });
    }

    let vault = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if options.manifest {
        let header = save.header();
        let doc = SlotManifest {
            slot,
            vault: vault.clone(),
            magic: header.magic,
            entry_count: header.entry_count,
            encrypted_entry_size: header.encrypted_entry_size,
            decrypted_entry_size: header.decrypted_entry_size,
            entries: manifest,
        };
        fs::write(report.out_dir.join(MANIFEST_NAME), serde_json::to_vec_pretty(&doc)?)?;
    }

    if options.decrypted_image {
        let image = save.decrypted_image().map_err(wrap)?;
        fs::write(report.out_dir.join(format!("{vault}.dec")), image)?;
    }

    Ok(report)
}
