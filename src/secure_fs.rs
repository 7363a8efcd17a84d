//! Rewinder - Secure Filesystem Operations
//!
//! Atomic writes, zero-overwrite deletes and directory wipes under one root.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Filesystem handle scoped to a root directory
#[derive(Debug, Clone)]
pub struct SecureFs {
    root: PathBuf,
}

impl SecureFs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path for a root-relative file
    pub fn path_of(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write file atomically (temp file + rename)
    pub fn write_file(&self, relative_path: &str, data: &[u8]) -> io::Result<()> {
        let path = self.path_of(relative_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        file.write_all(data)?;
        file.sync_all()?;

        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Read a whole file
    pub fn read_file(&self, relative_path: &str) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.path_of(relative_path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Overwrite with zeros, then unlink. Missing files are not an error.
    pub fn delete_file(&self, relative_path: &str) -> io::Result<()> {
        shred(&self.path_of(relative_path))
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.path_of(relative_path).exists()
    }

    /// File names directly inside a root-relative directory
    pub fn list_dir(&self, relative_path: &str) -> io::Result<Vec<String>> {
        let path = self.path_of(relative_path);
        let mut files = Vec::new();

        if path.exists() {
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    files.push(name.to_string());
                }
            }
        }

        Ok(files)
    }

    /// Shred every file in a root-relative directory, keeping the directory.
    /// Returns the number of files removed.
    pub fn wipe_dir(&self, relative_path: &str) -> io::Result<usize> {
        let dir = self.path_of(relative_path);
        if !dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in WalkDir::new(&dir).min_depth(1).contents_first(true) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_dir() {
                fs::remove_dir(entry.path())?;
            } else {
                shred(entry.path())?;
                count += 1;
            }
        }

        Ok(count)
    }

    /// Total bytes of all files below `root`
    pub fn total_size(&self) -> io::Result<u64> {
        let mut size = 0;

        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() {
                size += entry.metadata().map_err(io::Error::other)?.len();
            }
        }

        Ok(size)
    }
}

fn shred(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if let Ok(metadata) = fs::metadata(path) {
        let size = metadata.len() as usize;
        if size > 0 {
            if let Ok(mut file) = OpenOptions::new().write(true).open(path) {
                let zeros = vec![0u8; size.min(1024 * 1024)]; // Max 1MB chunks
                let mut remaining = size;
                while remaining > 0 {
                    let to_write = remaining.min(zeros.len());
                    if file.write_all(&zeros[..to_write]).is_err() {
                        break;
                    }
                    remaining -= to_write;
                }
                let _ = file.sync_all();
            }
        }
    }

    fs::remove_file(path)
}
