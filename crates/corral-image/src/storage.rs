//! Local image store.
//!
//! An image named `busybox` is the archive `busybox.tar` (or a gzip
//! compressed `busybox.tar.gz` / `busybox.tgz`) in the images directory.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Archive suffixes tried in order when resolving an image name.
const ARCHIVE_SUFFIXES: [&str; 3] = [".tar", ".tar.gz", ".tgz"];

/// Directory of image tarballs.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Opens the store rooted at `root`. The directory need not exist yet.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `image` to its archive on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] for names that would escape the
    /// store and [`CorralError::NotFound`] if no archive exists.
    pub fn archive(&self, image: &str) -> Result<PathBuf> {
        if image.is_empty() || image.contains('/') || image.starts_with('.') {
            return Err(CorralError::Config {
                message: format!("invalid image name {image:?}"),
            });
        }
        ARCHIVE_SUFFIXES
            .iter()
            .map(|suffix| self.root.join(format!("{image}{suffix}")))
            .find(|p| p.is_file())
            .ok_or_else(|| CorralError::NotFound {
                kind: "image",
                id: image.to_owned(),
            })
    }

    /// Names of all images in the store, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(&self.root, e)),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let file = entry.file_name().to_string_lossy().into_owned();
                ARCHIVE_SUFFIXES
                    .iter()
                    .rev()
                    .find_map(|suffix| file.strip_suffix(suffix).map(str::to_owned))
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
