//! Blocking writers for the two backup layouts.
//!
//! Both take an already-written database snapshot and the storage root,
//! and produce the same logical layout: `metadata.db` plus `storage/...`.
//! Callers run them on the blocking pool.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::{DATABASE_ENTRY, STORAGE_ENTRY};
use crate::file::is_partial_upload;
use crate::{Result, StowageError};

/// What ended up in a backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct ArchiveSummary {
    pub files: u64,
    pub size: u64,
}

/// Walk a storage tree in name order.
///
/// Staged uploads are skipped. Entries deleted by a concurrent request
/// between listing and reading are dropped; a missing `root` is an error.
fn walk_storage(root: &Path) -> impl Iterator<Item = Result<DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_str().is_some_and(is_partial_upload))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(Ok(entry)),
            Err(e)
                if e.depth() > 0
                    && e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) =>
            {
                debug!(path = ?e.path(), "Entry vanished during backup");
                None
            }
            Err(e) => Some(Err(e.into())),
        })
}

fn vanished(path: &Path) -> bool {
    matches!(fs::symlink_metadata(path), Err(e) if e.kind() == io::ErrorKind::NotFound)
}

/// Only a NotFound for the source itself counts as a concurrent delete.
fn skip_if_vanished(source: &Path, err: io::Error) -> Result<bool> {
    if err.kind() == io::ErrorKind::NotFound && vanished(source) {
        debug!(path = %source.display(), "File vanished during backup");
        Ok(false)
    } else {
        Err(err.into())
    }
}

/// Copy one file. `Ok(false)` if the source was deleted before it was read.
fn copy_file(source: &Path, target: &Path) -> Result<bool> {
    match fs::copy(source, target) {
        Ok(_) => Ok(true),
        Err(e) => skip_if_vanished(source, e),
    }
}

fn relative<'a>(path: &'a Path, root: &Path) -> Result<&'a Path> {
    path.strip_prefix(root)
        .map_err(|e| StowageError::Backup(format!("{}: {e}", path.display())))
}

/// Write a gzip-compressed tarball to `dest`.
pub(super) fn write_tar_gz(
    dest: &Path,
    database: Option<&Path>,
    storage: Option<&Path>,
) -> Result<ArchiveSummary> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut files = 0;
    if let Some(snapshot) = database {
        builder.append_path_with_name(snapshot, DATABASE_ENTRY)?;
        files += 1;
    }
    if let Some(storage) = storage {
        files += append_storage(&mut builder, storage)?;
    }

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(ArchiveSummary {
        files,
        size: fs::metadata(dest)?.len(),
    })
}

fn append_storage<W: Write>(builder: &mut Builder<W>, storage: &Path) -> Result<u64> {
    let mut files = 0;

    for entry in walk_storage(storage) {
        let entry = entry?;
        let name = Path::new(STORAGE_ENTRY).join(relative(entry.path(), storage)?);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if let Err(e) = builder.append_dir(&name, entry.path()) {
                skip_if_vanished(entry.path(), e)?;
            }
        } else if file_type.is_file() {
            let appended = match builder.append_path_with_name(entry.path(), &name) {
                Ok(()) => true,
                Err(e) => skip_if_vanished(entry.path(), e)?,
            };
            if appended {
                files += 1;
            }
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    Ok(files)
}

/// Build an uncompressed backup directory at `dest`.
///
/// The database snapshot is moved into the directory rather than copied.
pub(super) fn write_directory(
    dest: &Path,
    database: Option<&Path>,
    storage: Option<&Path>,
) -> Result<ArchiveSummary> {
    fs::create_dir_all(dest)?;

    let mut files = 0;
    if let Some(snapshot) = database {
        fs::rename(snapshot, dest.join(DATABASE_ENTRY))?;
        files += 1;
    }
    if let Some(storage) = storage {
        files += copy_tree(storage, &dest.join(STORAGE_ENTRY))?;
    }

    Ok(ArchiveSummary {
        files,
        size: tree_size(dest),
    })
}

fn copy_tree(source: &Path, dest: &Path) -> Result<u64> {
    let mut files = 0;

    for entry in walk_storage(source) {
        let entry = entry?;
        let target = dest.join(relative(entry.path(), source)?);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() && copy_file(entry.path(), &target)? {
            files += 1;
        }
    }

    Ok(files)
}

/// Total size of the regular files under `path` (or of `path` itself).
pub(super) fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let storage = temp.path().join("storage");
        fs::create_dir_all(storage.join("alice/docs")).unwrap();
        fs::create_dir_all(storage.join("bob")).unwrap();
        fs::write(storage.join("alice/docs/a.txt"), b"alpha").unwrap();
        fs::write(storage.join("bob/b.txt"), b"bravo").unwrap();
        fs::write(storage.join("bob/.upload-1234.part"), b"partial").unwrap();

        let snapshot = temp.path().join("snapshot.db");
        fs::write(&snapshot, b"sqlite bytes").unwrap();

        (temp, storage, snapshot)
    }

    #[test]
    fn test_walk_storage_skips_staged_uploads() {
        let (_temp, storage, _snapshot) = fixture();
        fs::write(storage.join("bob/notes.part"), b"kept").unwrap();

        let names: Vec<String> = walk_storage(&storage)
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["a.txt", "b.txt", "notes.part"]);
    }

    #[test]
    fn test_copy_file_vanished_source_is_skipped() {
        let temp = TempDir::new().unwrap();

        let copied = copy_file(&temp.path().join("gone.txt"), &temp.path().join("out.txt"));

        assert!(!copied.unwrap());
    }

    #[test]
    fn test_copy_file_missing_target_dir_fails() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, b"alpha").unwrap();

        let copied = copy_file(&source, &temp.path().join("no/such/dir/a.txt"));

        assert!(copied.is_err());
    }

    #[test]
    fn test_write_tar_gz_layout() {
        let (temp, storage, snapshot) = fixture();
        let dest = temp.path().join("out.tar.gz");

        let summary = write_tar_gz(&dest, Some(&snapshot), Some(&storage)).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.size, fs::metadata(&dest).unwrap().len());

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let mut names = Vec::new();
        let mut alpha = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
            if name == "storage/alice/docs/a.txt" {
                entry.read_to_string(&mut alpha).unwrap();
            }
            names.push(name);
        }

        assert!(names.contains(&"metadata.db".to_string()));
        assert!(names.contains(&"storage/alice/docs/a.txt".to_string()));
        assert!(names.contains(&"storage/bob/b.txt".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".part")));
        assert_eq!(alpha, "alpha");
    }

    #[test]
    fn test_write_tar_gz_storage_only() {
        let (temp, storage, _snapshot) = fixture();
        let dest = temp.path().join("out.tar.gz");

        let summary = write_tar_gz(&dest, None, Some(&storage)).unwrap();

        assert_eq!(summary.files, 2);
    }

    #[test]
    fn test_write_tar_gz_missing_storage_fails() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.tar.gz");

        let result = write_tar_gz(&dest, None, Some(&temp.path().join("missing")));

        assert!(result.is_err());
    }

    #[test]
    fn test_write_directory_layout() {
        let (temp, storage, snapshot) = fixture();
        let dest = temp.path().join("backup_dir");

        let summary = write_directory(&dest, Some(&snapshot), Some(&storage)).unwrap();

        assert_eq!(summary.files, 3);
        assert!(!snapshot.exists());
        assert_eq!(fs::read(dest.join("metadata.db")).unwrap(), b"sqlite bytes");
        assert_eq!(
            fs::read(dest.join("storage/alice/docs/a.txt")).unwrap(),
            b"alpha"
        );
        assert!(!dest.join("storage/bob/.upload-1234.part").exists());
        assert_eq!(summary.size, tree_size(&dest));
    }

    #[test]
    fn test_tree_size() {
        let (_temp, storage, _snapshot) = fixture();

        assert_eq!(tree_size(&storage), 5 + 5 + 7);
        assert_eq!(tree_size(&storage.join("bob/b.txt")), 5);
        assert_eq!(tree_size(&storage.join("missing")), 0);
    }
}
