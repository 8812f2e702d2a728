use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ExportError;

const DEFLATE_LEVEL: i64 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Split at the last dot; a leading dot is part of the name.
fn split_filename(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Give every name a unique spelling: repeats become `name_1.ext`, `name_2.ext`, ...
/// Names in `taken` are treated as already used.
pub fn deduplicate_filenames<'a>(
    names: impl IntoIterator<Item = &'a str>,
    taken: &HashSet<String>,
) -> Vec<String> {
    // Counters per base name avoid rescanning suffixes already handed out.
    let mut counters: HashMap<&str, u32> = HashMap::new();
    let mut used: HashSet<String> = taken.clone();
    let mut out = Vec::new();

    for name in names {
        if used.insert(name.to_string()) {
            out.push(name.to_string());
            continue;
        }
        let (base, ext) = split_filename(name);
        let counter = counters.entry(name).or_insert(0);
        loop {
            *counter += 1;
            let candidate = match ext {
                Some(ext) => format!("{}_{}.{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            };
            if used.insert(candidate.clone()) {
                out.push(candidate);
                break;
            }
        }
    }
    out
}

fn validate(entries: &[ArchiveEntry]) -> Result<(), ExportError> {
    if entries.is_empty() {
        return Err(ExportError::EmptyArchive);
    }
    if entries.iter().any(|e| e.filename.trim().is_empty()) {
        return Err(ExportError::InvalidFilename);
    }
    Ok(())
}

/// Build a ZIP of `entries`. Progress goes 0, per entry up to 90, 95 before finishing, 100 last.
pub fn create_archive(entries: &[ArchiveEntry], on_progress: Option<&dyn Fn(u8)>) -> Result<Vec<u8>, ExportError> {
    validate(entries)?;
    let report = |percent: u8| {
        if let Some(cb) = on_progress {
            cb(percent);
        }
    };
    report(0);

    let names = deduplicate_filenames(entries.iter().map(|e| e.filename.as_str()), &HashSet::new());
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DEFLATE_LEVEL));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let total = entries.len();
    for (i, (entry, name)) in entries.iter().zip(&names).enumerate() {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&entry.data)?;
        report(((i + 1) * 90 / total) as u8);
    }

    report(95);
    let bytes = zip.finish()?.into_inner();
    log::debug!("Archived {} file(s), {} bytes", total, bytes.len());
    report(100);
    Ok(bytes)
}

/// Names of regular files directly inside `dir`.
fn existing_names(dir: &Path) -> HashSet<String> {
    let Ok(read) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    read.flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect()
}

/// Write each entry into `dir`. Unless `overwrite` is set, files already there are left alone
/// and colliding entries get a suffixed name.
pub fn write_to_directory(entries: &[ArchiveEntry], dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>, ExportError> {
    validate(entries)?;
    fs::create_dir_all(dir)?;

    let taken = if overwrite { HashSet::new() } else { existing_names(dir) };
    let names = deduplicate_filenames(entries.iter().map(|e| e.filename.as_str()), &taken);

    let mut written = Vec::with_capacity(entries.len());
    for (entry, name) in entries.iter().zip(names) {
        let path = dir.join(name);
        fs::write(&path, &entry.data)?;
        written.push(path);
    }
    log::info!("Wrote {} file(s) to {}", written.len(), dir.display());
    Ok(written)
}
