use std::fs;
use std::path::Path;
use std::time::Duration;

use common::{folder_of, now_secs, path_to_string, SongRecord, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use metadata::{normalize_text, read_tags, CoverArt, MetadataError, TagInfo};
use tracing::{debug, warn};

use crate::covers::{CoverKey, CoverStore};

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    CorruptFile(String),
    Io(std::io::Error),
    TimedOut(Duration),
    Worker(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            ExtractError::CorruptFile(msg) => write!(f, "corrupt file: {}", msg),
            ExtractError::Io(err) => write!(f, "io error: {}", err),
            ExtractError::TimedOut(limit) => write!(f, "extraction gave up after {:?}", limit),
            ExtractError::Worker(msg) => write!(f, "extraction worker failed: {}", msg),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<std::io::Error> for ExtractError {
    fn from(err: std::io::Error) -> Self {
        ExtractError::Io(err)
    }
}

impl From<MetadataError> for ExtractError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UnsupportedFormat(msg) => ExtractError::UnsupportedFormat(msg),
            MetadataError::CorruptFile(msg) => ExtractError::CorruptFile(msg),
            MetadataError::Io(err) => ExtractError::Io(err),
        }
    }
}

pub trait SongReader: Send + Sync {
    fn read_song(&self, path: &Path) -> Result<SongRecord, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct TagReader {
    covers: CoverStore,
}

impl TagReader {
    pub fn new(covers: CoverStore) -> Self {
        Self { covers }
    }

    fn store_cover(&self, path: &Path, song: &SongRecord, art: &CoverArt) -> Option<String> {
        let key = CoverKey::Song {
            artist: &song.artist,
            title: &song.title,
        };
        match self.covers.write(&key, art) {
            Ok(cover_path) => Some(path_to_string(&cover_path)),
            Err(err) => {
                warn!("Failed to write cover for {:?}: {}", path, err);
                None
            }
        }
    }
}

impl SongReader for TagReader {
    fn read_song(&self, path: &Path) -> Result<SongRecord, ExtractError> {
        let file_size = fs::metadata(path)?.len();
        let mut tags = read_tags(path)?;
        let art = tags.cover.take();
        let mut song = song_from_tags(path, file_size, tags);
        if let Some(art) = art {
            song.cover = self.store_cover(path, &song, &art);
        }
        debug!("Extracted {:?} ({} - {})", path, song.artist, song.title);
        Ok(song)
    }
}

pub fn song_from_tags(path: &Path, file_size: u64, tags: TagInfo) -> SongRecord {
    let title = tags
        .title
        .or_else(|| file_stem(path))
        .unwrap_or_else(|| path_to_string(path));
    let artist = tags
        .artist
        .or(tags.album_artist)
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = tags.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

    SongRecord {
        url: path_to_string(path),
        folder: folder_of(path),
        title,
        artist,
        album,
        track_no: tags.track_no,
        disc_no: tags.disc_no,
        genre: tags.genres.into_iter().next(),
        year: tags.year,
        file_size,
        media_type: media_type(path),
        duration_ms: tags.duration_ms.unwrap_or(0),
        bitrate: tags.bitrate,
        sample_rate: tags.sample_rate,
        cover: None,
        created_at: now_secs(),
    }
}

pub fn media_type(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| normalize_text(&stem.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use lofty::config::WriteOptions;
    use lofty::picture::{MimeType, Picture, PictureType};
    use lofty::prelude::{ItemKey, TagExt};
    use lofty::tag::{Tag, TagType};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn tagged_wav(path: &Path) {
        let sample_rate = 8_000u32;
        let data_len = sample_rate * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(out.len() + data_len as usize, 0);
        fs::write(path, out).unwrap();

        let mut tag = Tag::new(TagType::Id3v2);
        tag.insert_text(ItemKey::TrackTitle, "Tone".to_string());
        tag.insert_text(ItemKey::TrackArtist, "Tester".to_string());
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(MimeType::Png),
            None,
            PNG.to_vec(),
        ));
        tag.save_to_path(path, WriteOptions::default()).unwrap();
    }

    #[test]
    fn missing_tags_fall_back_to_path() {
        let path = PathBuf::from("/music/Some Folder/07 - Intro.MP3");
        let song = song_from_tags(&path, 2048, TagInfo::default());
        assert_eq!(song.url, "/music/Some Folder/07 - Intro.MP3");
        assert_eq!(song.folder, "/music/Some Folder");
        assert_eq!(song.title, "07 - Intro");
        assert_eq!(song.artist, UNKNOWN_ARTIST);
        assert_eq!(song.album, UNKNOWN_ALBUM);
        assert_eq!(song.media_type, "mp3");
        assert_eq!(song.file_size, 2048);
        assert!(song.cover.is_none());
    }

    #[test]
    fn album_artist_fills_missing_artist() {
        let tags = TagInfo {
            album_artist: Some("Various".to_string()),
            genres: vec!["Rock".to_string(), "Pop".to_string()],
            year: Some(1991),
            ..TagInfo::default()
        };
        let song = song_from_tags(Path::new("/m/a.flac"), 1, tags);
        assert_eq!(song.artist, "Various");
        assert_eq!(song.genre.as_deref(), Some("Rock"));
        assert_eq!(song.year, Some(1991));
    }

    #[test]
    fn metadata_errors_keep_their_kind() {
        let err: ExtractError = MetadataError::CorruptFile("bad frame".to_string()).into();
        assert!(matches!(err, ExtractError::CorruptFile(_)));
        let err: ExtractError = MetadataError::UnsupportedFormat("xyz".to_string()).into();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
        assert_eq!(
            ExtractError::TimedOut(Duration::from_secs(30)).to_string(),
            "extraction gave up after 30s"
        );
    }

    #[test]
    fn tag_reader_rejects_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let reader = TagReader::new(CoverStore::new(dir.path().join("covers")));
        let path = dir.path().join("broken.flac");
        fs::write(&path, vec![0u8; 2048]).unwrap();
        assert!(matches!(
            reader.read_song(&path),
            Err(ExtractError::CorruptFile(_))
        ));
        assert!(matches!(
            reader.read_song(&dir.path().join("absent.mp3")),
            Err(ExtractError::Io(_))
        ));
    }

    #[test]
    fn embedded_cover_is_cached_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let covers = CoverStore::new(dir.path().join("covers"));
        let path = dir.path().join("tone.wav");
        tagged_wav(&path);

        let song = TagReader::new(covers.clone()).read_song(&path).unwrap();
        assert_eq!(song.title, "Tone");
        assert_eq!(song.artist, "Tester");
        let cover = song.cover.expect("cover recorded");
        let cover = PathBuf::from(cover);
        assert!(cover.is_file());
        assert!(cover.starts_with(covers.root()));
        assert_eq!(cover.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(fs::read(&cover).unwrap(), PNG);
    }

    #[test]
    fn unwritable_cover_cache_leaves_cover_unset() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("covers");
        fs::write(&blocker, b"not a directory").unwrap();
        let path = dir.path().join("tone.wav");
        tagged_wav(&path);

        let song = TagReader::new(CoverStore::new(blocker))
            .read_song(&path)
            .unwrap();
        assert_eq!(song.title, "Tone");
        assert!(song.cover.is_none());
    }
}
