use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const UNKNOWN_ARTIST: &str = "Unknown artist";
pub const UNKNOWN_ALBUM: &str = "Unknown album";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub url: String,
    pub folder: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub file_size: u64,
    pub media_type: String,
    pub duration_ms: u32,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub cover: Option<String>,
    pub created_at: u64,
}

impl SongRecord {
    pub fn album_key(&self) -> AlbumKey {
        AlbumKey::new(&self.artist, &self.album)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlbumKey {
    pub artist: String,
    pub name: String,
}

impl AlbumKey {
    pub fn new(artist: &str, name: &str) -> Self {
        Self {
            artist: artist.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Artist,
    Album,
    Folder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Artist,
    Album,
    Song,
    Folder,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Artist,
        Category::Album,
        Category::Song,
        Category::Folder,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Artist => "Artist",
            Category::Album => "Album",
            Category::Song => "Song",
            Category::Folder => "Folder",
        }
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn folder_of(path: &Path) -> String {
    path.parent().map(path_to_string).unwrap_or_default()
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}
