use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

use common::{AlbumKey, SongRecord};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::LibraryError;

const INDEX_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const SONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("songs");

const META_VERSION_KEY: &str = "version";

pub trait SongStore: Send + Sync {
    fn select_all_songs(&self) -> Result<Vec<SongRecord>, LibraryError>;

    // Idempotent upsert keyed by url.
    fn save_songs(&self, songs: &[SongRecord]) -> Result<(), LibraryError>;

    fn select_all_artists(&self) -> Result<Vec<(String, Vec<SongRecord>)>, LibraryError> {
        Ok(group_songs(self.select_all_songs()?, |song| song.artist.clone()))
    }

    fn select_all_albums(&self) -> Result<Vec<(AlbumKey, Vec<SongRecord>)>, LibraryError> {
        Ok(group_songs(self.select_all_songs()?, SongRecord::album_key))
    }

    fn select_all_folders(&self) -> Result<Vec<(String, Vec<SongRecord>)>, LibraryError> {
        Ok(group_songs(self.select_all_songs()?, |song| song.folder.clone()))
    }
}

#[derive(Clone)]
pub struct RedbSongStore {
    db: Arc<Database>,
}

impl RedbSongStore {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let store = Self { db: Arc::new(db) };
        store.check_version()?;
        Ok(store)
    }

    pub fn song_count(&self) -> Result<usize, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SONGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(table.len()? as usize)
    }

    fn check_version(&self) -> Result<(), LibraryError> {
        match read_version(&self.db)? {
            Some(version) if version == INDEX_VERSION => Ok(()),
            Some(version) => {
                warn!("Index version mismatch ({}); clearing stored songs", version);
                self.reset()
            }
            None => {
                info!("Creating empty song index");
                self.reset()
            }
        }
    }

    fn reset(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, SONGS_TABLE)?;
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&INDEX_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
            write_txn.open_table(SONGS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl SongStore for RedbSongStore {
    fn select_all_songs(&self) -> Result<Vec<SongRecord>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SONGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut songs = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let song: SongRecord = decode_value(entry.1.value())?;
            songs.push(song);
        }
        Ok(songs)
    }

    fn save_songs(&self, songs: &[SongRecord]) -> Result<(), LibraryError> {
        if songs.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SONGS_TABLE)?;
            for song in songs {
                let bytes = encode_value(song)?;
                table.insert(song.url.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

pub fn group_songs<K, F>(songs: Vec<SongRecord>, key_of: F) -> Vec<(K, Vec<SongRecord>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&SongRecord) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<SongRecord>)> = Vec::new();
    for song in songs {
        let key = key_of(&song);
        match positions.get(&key).copied() {
            Some(pos) => groups[pos].1.push(song),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![song]));
            }
        }
    }
    groups
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(url: &str, artist: &str, album: &str, folder: &str) -> SongRecord {
        SongRecord {
            url: url.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            folder: folder.to_string(),
            title: url.to_string(),
            ..SongRecord::default()
        }
    }

    #[test]
    fn save_is_an_upsert_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbSongStore::open(&dir.path().join("db/library.redb")).unwrap();
        assert!(store.select_all_songs().unwrap().is_empty());

        store
            .save_songs(&[song("/m/1.mp3", "A", "X", "/m"), song("/m/2.mp3", "B", "Y", "/m")])
            .unwrap();
        let mut renamed = song("/m/1.mp3", "A", "X", "/m");
        renamed.title = "Renamed".to_string();
        store.save_songs(&[renamed]).unwrap();

        let songs = store.select_all_songs().unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(store.song_count().unwrap(), 2);
        let first = songs.iter().find(|s| s.url == "/m/1.mp3").unwrap();
        assert_eq!(first.title, "Renamed");
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.redb");
        {
            let store = RedbSongStore::open(&path).unwrap();
            store.save_songs(&[song("/m/1.mp3", "A", "X", "/m")]).unwrap();
        }
        let store = RedbSongStore::open(&path).unwrap();
        let songs = store.select_all_songs().unwrap();
        assert_eq!(songs, vec![song("/m/1.mp3", "A", "X", "/m")]);
    }

    #[test]
    fn grouped_selects_follow_first_sighting() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbSongStore::open(&dir.path().join("library.redb")).unwrap();
        store
            .save_songs(&[
                song("/m/a/1.mp3", "Zed", "Same", "/m/a"),
                song("/m/a/2.mp3", "Amy", "Same", "/m/a"),
                song("/m/b/3.mp3", "Zed", "Other", "/m/b"),
            ])
            .unwrap();

        let artists = store.select_all_artists().unwrap();
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].0, "Zed");
        assert_eq!(artists[0].1.len(), 2);

        let albums = store.select_all_albums().unwrap();
        assert_eq!(albums.len(), 3);
        assert!(albums.iter().any(|(key, _)| key == &AlbumKey::new("Amy", "Same")));

        let folders = store.select_all_folders().unwrap();
        let names: Vec<&str> = folders.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["/m/a", "/m/b"]);
    }
}
