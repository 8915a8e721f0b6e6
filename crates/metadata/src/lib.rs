use std::path::Path;

use lofty::error::{ErrorKind, LoftyError};
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub genres: Vec<String>,
    pub cover: Option<CoverArt>,
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

impl CoverArt {
    pub fn extension(&self) -> &'static str {
        match self.mime.as_deref() {
            Some("image/png") => "png",
            Some("image/gif") => "gif",
            Some("image/webp") => "webp",
            _ => "jpg",
        }
    }
}

#[derive(Debug)]
pub enum MetadataError {
    UnsupportedFormat(String),
    CorruptFile(String),
    Io(std::io::Error),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            MetadataError::CorruptFile(msg) => write!(f, "corrupt file: {}", msg),
            MetadataError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        match err.kind() {
            ErrorKind::UnknownFormat => MetadataError::UnsupportedFormat(err.to_string()),
            ErrorKind::Io(io) => {
                MetadataError::Io(std::io::Error::new(io.kind(), io.to_string()))
            }
            _ => MetadataError::CorruptFile(err.to_string()),
        }
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    info.sample_rate = properties.sample_rate();
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.get_string(&ItemKey::TrackTitle).and_then(normalize_text);
        info.album = tag.get_string(&ItemKey::AlbumTitle).and_then(normalize_text);
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).and_then(normalize_text);
        let track_artist = tag.get_string(&ItemKey::TrackArtist).and_then(normalize_text);
        info.artist = track_artist.or_else(|| album_artist.clone());
        info.album_artist = album_artist;
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_u16);
        info.disc_no = tag
            .get_string(&ItemKey::DiscNumber)
            .and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
        info.cover = pick_picture(tag.pictures()).and_then(cover_art);
    }

    Ok(info)
}

pub fn normalize_text(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    for ch in value.nfc() {
        if ch == '\u{feff}' || ch == '\0' {
            continue;
        }
        if ch.is_control() {
            if ch.is_whitespace() {
                out.push(' ');
            }
            continue;
        }
        out.push(ch);
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() != 4 {
        None
    } else {
        digits.parse().ok()
    }
}

fn parse_genres(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        if let Some(genre) = normalize_text(part) {
            out.push(genre);
        }
    }
    out
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

fn cover_art(picture: &Picture) -> Option<CoverArt> {
    let data = picture.data().to_vec();
    if data.is_empty() {
        return None;
    }
    let mime = guess_mime(&data);
    Some(CoverArt { data, mime })
}

fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif".to_string())
    } else if bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn silent_wav(seconds: u32) -> Vec<u8> {
        let sample_rate = 44_100u32;
        let channels = 2u16;
        let bits = 16u16;
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * u32::from(block_align);
        let data_len = byte_rate * seconds;

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(out.len() + data_len as usize, 0);
        out
    }

    #[test]
    fn normalize_text_composes_and_strips() {
        assert_eq!(normalize_text("Cafe\u{301}").as_deref(), Some("Caf\u{e9}"));
        assert_eq!(normalize_text("\u{feff}Artist\0").as_deref(), Some("Artist"));
        assert_eq!(normalize_text("Line\tBreak\n").as_deref(), Some("Line Break"));
        assert_eq!(normalize_text("  \0 \u{7} "), None);
    }

    #[test]
    fn numbers_accept_total_suffix() {
        assert_eq!(parse_u16("3/12"), Some(3));
        assert_eq!(parse_u16(" 7 "), Some(7));
        assert_eq!(parse_u16("A"), None);
    }

    #[test]
    fn year_takes_first_four_digits() {
        assert_eq!(parse_year("1999-04-01"), Some(1999));
        assert_eq!(parse_year("Released 2004"), Some(2004));
        assert_eq!(parse_year("99"), None);
    }

    #[test]
    fn genres_split_and_drop_empty() {
        assert_eq!(parse_genres("Rock; Pop//Jazz"), vec!["Rock", "Pop", "Jazz"]);
        assert!(parse_genres(" ; ").is_empty());
    }

    #[test]
    fn mime_is_sniffed_from_magic() {
        assert_eq!(guess_mime(&[0xFF, 0xD8, 0xFF, 0xE0]).as_deref(), Some("image/jpeg"));
        assert_eq!(guess_mime(b"\x89PNG\r\n").as_deref(), Some("image/png"));
        assert_eq!(guess_mime(b"nope"), None);
        let art = CoverArt {
            data: vec![1],
            mime: Some("image/png".to_string()),
        };
        assert_eq!(art.extension(), "png");
    }

    #[test]
    fn reads_properties_from_untagged_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fs::write(&path, silent_wav(1)).unwrap();

        let info = read_tags(&path).unwrap();
        assert_eq!(info.sample_rate, Some(44_100));
        let duration = info.duration_ms.unwrap();
        assert!((990..=1010).contains(&duration), "duration {}", duration);
        assert!(info.title.is_none());
        assert!(info.cover.is_none());
    }

    #[test]
    fn unknown_container_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.xyz");
        fs::write(&path, b"plain text, not audio").unwrap();

        match read_tags(&path) {
            Err(MetadataError::UnsupportedFormat(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn garbage_flac_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.flac");
        fs::write(&path, vec![0x42u8; 4096]).unwrap();

        match read_tags(&path) {
            Err(MetadataError::CorruptFile(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.mp3");
        match read_tags(&path) {
            Err(MetadataError::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
