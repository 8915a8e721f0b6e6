use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::LibraryConfig;
use crate::LibraryError;

pub const MIN_FILE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_EXTENSIONS: &[&str] = &["wav", "wma", "mp2", "mp3", "mp4", "m4a", "flac", "ogg"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanSource {
    Directory(PathBuf),
    Files(Vec<PathBuf>),
}

#[derive(Clone, Debug)]
pub struct Scanner {
    extensions: HashSet<String>,
    min_size: u64,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().copied(), MIN_FILE_SIZE)
    }
}

impl Scanner {
    pub fn new<I, S>(extensions: I, min_size: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            extensions,
            min_size,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(&config.extensions, config.min_file_size)
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }

    // Fails only when the root itself cannot be used.
    pub fn check_source(&self, source: &ScanSource) -> Result<(), LibraryError> {
        let root = match source {
            ScanSource::Directory(root) => root,
            ScanSource::Files(_) => return Ok(()),
        };
        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(LibraryError::Root {
                path: root.clone(),
                reason: "not a directory".to_string(),
            }),
            Err(err) => Err(LibraryError::Root {
                path: root.clone(),
                reason: err.to_string(),
            }),
        }
    }

    pub fn scan(
        &self,
        source: &ScanSource,
        cancel: CancellationToken,
    ) -> Result<ScanIter, LibraryError> {
        self.check_source(source)?;
        let inner = match source {
            ScanSource::Directory(root) => ScanInner::Walk(
                WalkDir::new(root)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter(),
            ),
            ScanSource::Files(files) => ScanInner::Files(files.clone().into_iter()),
        };
        Ok(ScanIter {
            inner,
            scanner: self.clone(),
            cancel,
        })
    }

    fn accepts(&self, path: &Path, len: u64) -> bool {
        len >= self.min_size && self.is_supported(path)
    }
}

enum ScanInner {
    Walk(walkdir::IntoIter),
    Files(std::vec::IntoIter<PathBuf>),
}

pub struct ScanIter {
    inner: ScanInner,
    scanner: Scanner,
    cancel: CancellationToken,
}

impl ScanIter {
    fn next_walk_candidate(&mut self) -> Option<PathBuf> {
        let ScanInner::Walk(walk) = &mut self.inner else {
            return None;
        };
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let entry = match walk.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.scanner.is_supported(entry.path()) {
                continue;
            }
            let len = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!("Failed to stat {:?}: {}", entry.path(), err);
                    continue;
                }
            };
            if self.scanner.accepts(entry.path(), len) {
                return Some(entry.into_path());
            }
        }
    }

    fn next_listed_candidate(&mut self) -> Option<PathBuf> {
        let ScanInner::Files(files) = &mut self.inner else {
            return None;
        };
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let path = files.next()?;
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!("Skipping {:?}: {}", path, err);
                    continue;
                }
            };
            if meta.is_file() && self.scanner.accepts(&path, meta.len()) {
                return Some(path);
            }
        }
    }
}

impl Iterator for ScanIter {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        match self.inner {
            ScanInner::Walk(_) => self.next_walk_candidate(),
            ScanInner::Files(_) => self.next_listed_candidate(),
        }
    }
}
