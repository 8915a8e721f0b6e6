use std::fs;
use std::path::{Path, PathBuf};

use common::stable_id;
use metadata::CoverArt;

const CACHE_EXTS: [&str; 4] = ["jpg", "png", "webp", "gif"];
const PLACEHOLDER_FILE: &str = "placeholder.png";
const FOLDER_FILE: &str = "folder.png";
const KEY_SEP: char = '\x1f';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverKey<'a> {
    Artist(&'a str),
    Album { artist: &'a str, album: &'a str },
    Song { artist: &'a str, title: &'a str },
}

impl CoverKey<'_> {
    fn cache_stem(&self) -> String {
        match self {
            CoverKey::Artist(name) => format!("artist-{}", stable_id(name)),
            CoverKey::Album { artist, album } => {
                format!("album-{}", stable_id(&join_key(artist, album)))
            }
            CoverKey::Song { artist, title } => {
                format!("song-{}", stable_id(&join_key(artist, title)))
            }
        }
    }
}

pub trait CoverResolver: Send + Sync {
    fn cover_exists(&self, key: &CoverKey<'_>) -> bool;
    fn resolve_path(&self, key: &CoverKey<'_>) -> PathBuf;
    fn placeholder(&self) -> PathBuf;
    fn folder_cover(&self) -> PathBuf;

    fn cover_or_placeholder(&self, key: &CoverKey<'_>) -> PathBuf {
        if self.cover_exists(key) {
            self.resolve_path(key)
        } else {
            self.placeholder()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoverRequest {
    Artist { artist: String },
    Album { artist: String, album: String },
}

impl CoverRequest {
    pub fn key(&self) -> CoverKey<'_> {
        match self {
            CoverRequest::Artist { artist } => CoverKey::Artist(artist),
            CoverRequest::Album { artist, album } => CoverKey::Album { artist, album },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverStore {
    root: PathBuf,
}

impl CoverStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn find_cached(&self, key: &CoverKey<'_>) -> Option<PathBuf> {
        let stem = key.cache_stem();
        for ext in CACHE_EXTS {
            let path = self.root.join(format!("{}.{}", stem, ext));
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    pub fn write(&self, key: &CoverKey<'_>, art: &CoverArt) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.root)?;
        let path = self
            .root
            .join(format!("{}.{}", key.cache_stem(), art.extension()));
        fs::write(&path, &art.data)?;
        Ok(path)
    }
}

impl CoverResolver for CoverStore {
    fn cover_exists(&self, key: &CoverKey<'_>) -> bool {
        self.find_cached(key).is_some()
    }

    fn resolve_path(&self, key: &CoverKey<'_>) -> PathBuf {
        self.find_cached(key)
            .unwrap_or_else(|| self.root.join(format!("{}.jpg", key.cache_stem())))
    }

    fn placeholder(&self) -> PathBuf {
        self.root.join(PLACEHOLDER_FILE)
    }

    fn folder_cover(&self) -> PathBuf {
        self.root.join(FOLDER_FILE)
    }
}

fn join_key(first: &str, second: &str) -> String {
    let mut out = String::with_capacity(first.len() + second.len() + 1);
    out.push_str(first.trim());
    out.push(KEY_SEP);
    out.push_str(second.trim());
    out
}
