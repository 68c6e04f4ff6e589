//! Repository snapshots
//!
//! A snapshot is a gzip-compressed tar of a repository directory with the
//! directory's contents at the archive root. Archives are deterministic:
//! entries are sorted, timestamps and ownership are zeroed, and modes are
//! fixed, so archiving the same content twice yields identical bytes.

use flate2::{write::GzEncoder, Compression};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const MTIME: u64 = 0;
const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Errors that can occur while archiving or extracting a repository
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Failed to list a directory
    #[error("failed to read directory '{}'", path.display())]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read a file
    #[error("failed to read file '{}'", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create the archive or the extraction directory
    #[error("failed to create '{}'", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to remove a directory
    #[error("failed to remove '{}'", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write an archive entry
    #[error("failed to write snapshot archive")]
    WriteArchive(#[source] io::Error),

    /// Failed to finish the gzip stream
    #[error("failed to finalize snapshot archive")]
    FinalizeArchive(#[source] io::Error),

    /// Failed to unpack an archive
    #[error("failed to extract '{}'", path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Archive `dir` into `output` and remove `dir`
pub fn archive_repo(dir: &Path, output: &Path) -> Result<(), SnapshotError> {
    write_archive(dir, output)?;
    fs::remove_dir_all(dir).map_err(|source| SnapshotError::Remove {
        path: dir.to_path_buf(),
        source,
    })?;
    debug!(dir = %dir.display(), output = %output.display(), "archived repository");
    Ok(())
}

/// Write a deterministic archive of `dir` without touching `dir`
pub fn write_archive(dir: &Path, output: &Path) -> Result<(), SnapshotError> {
    let mut directories = Vec::new();
    let mut files = Vec::new();
    collect(dir, "", &mut directories, &mut files)?;
    directories.sort();
    files.sort();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SnapshotError::Create {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(output).map_err(|source| SnapshotError::Create {
        path: output.to_path_buf(),
        source,
    })?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for name in &directories {
        let mut header = header(tar::EntryType::Directory, 0, DIR_MODE);
        tar.append_data(&mut header, format!("{name}/"), io::empty())
            .map_err(SnapshotError::WriteArchive)?;
    }
    for name in &files {
        let path = dir.join(name);
        let contents = fs::read(&path).map_err(|source| SnapshotError::ReadFile { path, source })?;
        let mut header = header(tar::EntryType::Regular, contents.len() as u64, FILE_MODE);
        tar.append_data(&mut header, name, contents.as_slice())
            .map_err(SnapshotError::WriteArchive)?;
    }

    let gz = tar.into_inner().map_err(SnapshotError::WriteArchive)?;
    gz.finish().map_err(SnapshotError::FinalizeArchive)?;
    Ok(())
}

fn header(kind: tar::EntryType, size: u64, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(MTIME);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    header
}

fn collect(
    dir: &Path,
    prefix: &str,
    directories: &mut Vec<String>,
    files: &mut Vec<String>,
) -> Result<(), SnapshotError> {
    let read_error = |source| SnapshotError::ReadDirectory {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            collect(&path, &relative, directories, files)?;
            directories.push(relative);
        } else if path.is_file() {
            files.push(relative);
        }
    }
    Ok(())
}

/// Replace `dir` with the contents of the archive at `archive`
pub fn extract_repo(archive: &Path, dir: &Path) -> Result<(), SnapshotError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|source| SnapshotError::Remove {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(dir).map_err(|source| SnapshotError::Create {
        path: dir.to_path_buf(),
        source,
    })?;

    let file = File::open(archive).map_err(|source| SnapshotError::ReadFile {
        path: archive.to_path_buf(),
        source,
    })?;
    tar::Archive::new(flate2::read::GzDecoder::new(file))
        .unpack(dir)
        .map_err(|source| SnapshotError::Extract {
            path: archive.to_path_buf(),
            source,
        })?;
    debug!(archive = %archive.display(), dir = %dir.display(), "extracted repository");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("datasets/HSC/misc")).unwrap();
        fs::write(dir.join("catalog.json"), b"{}").unwrap();
        fs::write(dir.join("datasets/HSC/misc/a.json"), b"[1]").unwrap();
    }

    #[test]
    fn archives_are_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        populate(&repo);

        write_archive(&repo, &tmp.path().join("one.tgz")).unwrap();
        write_archive(&repo, &tmp.path().join("two.tgz")).unwrap();
        assert_eq!(
            fs::read(tmp.path().join("one.tgz")).unwrap(),
            fs::read(tmp.path().join("two.tgz")).unwrap()
        );
    }

    #[test]
    fn archive_removes_and_extract_restores() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        populate(&repo);
        let archive = tmp.path().join("out/repo.tgz");

        archive_repo(&repo, &archive).unwrap();
        assert!(!repo.exists());

        let restored = tmp.path().join("restored");
        fs::create_dir_all(restored.join("stale")).unwrap();
        extract_repo(&archive, &restored).unwrap();
        assert!(!restored.join("stale").exists());
        assert_eq!(fs::read(restored.join("datasets/HSC/misc/a.json")).unwrap(), b"[1]");
    }

    #[test]
    fn missing_archive_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_repo(&tmp.path().join("nope.tgz"), &tmp.path().join("dir")).unwrap_err();
        assert!(err.to_string().contains("nope.tgz"));
    }
}
