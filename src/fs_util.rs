use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::HarvestError;

/// Extracts every member of `zip_path` under `target_dir` and returns the
/// written file paths. Member paths are all checked before the first write,
/// so a single escaping entry leaves the destination untouched.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        HarvestError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| {
        HarvestError::CorruptArchive(format!("{}: {err}", display_name(zip_path)))
    })?;

    let mut targets = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| HarvestError::CorruptArchive(err.to_string()))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| HarvestError::PathTraversal(entry.name().to_string()))?;
        let target = target_dir.join(&relative);
        if !target.starts_with(target_dir) {
            return Err(HarvestError::PathTraversal(entry.name().to_string()));
        }
        targets.push((target, entry.is_dir()));
    }

    fs::create_dir_all(target_dir).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut written = Vec::new();
    for (i, (entry_path, is_dir)) in targets.into_iter().enumerate() {
        if is_dir {
            fs::create_dir_all(&entry_path)
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            continue;
        }

        let mut entry = archive
            .by_index(i)
            .map_err(|err| HarvestError::CorruptArchive(err.to_string()))?;
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| HarvestError::CorruptArchive(err.to_string()))?;
        written.push(entry_path);
    }
    Ok(written)
}

/// Removes a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<(), HarvestError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(HarvestError::Filesystem(format!(
            "remove {}: {err}",
            path.display()
        ))),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
