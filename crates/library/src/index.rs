use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use common::{EntryKind, SongRecord};

use crate::events::EntrySummary;

#[derive(Debug, Clone)]
pub struct OrderedIndex<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    positions: HashMap<K, usize>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Upsert<V> {
    Inserted(usize),
    Replaced(usize, V),
}

impl<K, V> Default for OrderedIndex<K, V> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> OrderedIndex<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.contains_key(key)
    }

    pub fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.get(key).copied()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.position(key)?;
        self.values.get(pos)
    }

    pub fn get_index_mut(&mut self, pos: usize) -> Option<&mut V> {
        self.values.get_mut(pos)
    }

    // Replacing keeps the original row.
    pub fn insert(&mut self, key: K, value: V) -> Upsert<V> {
        if let Some(&pos) = self.positions.get(&key) {
            let old = std::mem::replace(&mut self.values[pos], value);
            return Upsert::Replaced(pos, old);
        }
        let pos = self.values.len();
        self.positions.insert(key.clone(), pos);
        self.keys.push(key);
        self.values.push(value);
        Upsert::Inserted(pos)
    }

    pub fn get_or_insert_with<F>(&mut self, key: &K, create: F) -> (usize, &mut V, bool)
    where
        F: FnOnce() -> V,
    {
        let existing = self.positions.get(key).copied();
        let (pos, created) = match existing {
            Some(pos) => (pos, false),
            None => {
                let pos = self.values.len();
                self.positions.insert(key.clone(), pos);
                self.keys.push(key.clone());
                self.values.push(create());
                (pos, true)
            }
        };
        (pos, &mut self.values[pos], created)
    }

    // Later rows shift up by one.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.positions.remove(key)?;
        self.keys.remove(pos);
        let value = self.values.remove(pos);
        for (offset, moved) in self.keys[pos..].iter().enumerate() {
            if let Some(slot) = self.positions.get_mut::<K>(moved) {
                *slot = pos + offset;
            }
        }
        Some(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.values.clear();
        self.positions.clear();
    }
}

#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub kind: EntryKind,
    pub name: String,
    pub artist: Option<String>,
    pub count: usize,
    pub cover: String,
    songs: OrderedIndex<String, Arc<SongRecord>>,
}

impl CollectionEntry {
    pub fn new(kind: EntryKind, name: &str, artist: Option<&str>, cover: String) -> Self {
        Self {
            kind,
            name: name.to_string(),
            artist: artist.map(|value| value.to_string()),
            count: 0,
            cover,
            songs: OrderedIndex::new(),
        }
    }

    pub fn attach(&mut self, song: Arc<SongRecord>) {
        self.songs.insert(song.url.clone(), song);
        self.count = self.songs.len();
    }

    pub fn detach(&mut self, url: &str) -> Option<Arc<SongRecord>> {
        let removed = self.songs.remove(url);
        self.count = self.songs.len();
        removed
    }

    pub fn contains(&self, url: &str) -> bool {
        self.songs.contains_key(url)
    }

    pub fn songs(&self) -> impl Iterator<Item = &Arc<SongRecord>> {
        self.songs.values()
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            name: self.name.clone(),
            artist: self.artist.clone(),
            count: self.count,
            cover: self.cover.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(url: &str) -> Arc<SongRecord> {
        Arc::new(SongRecord {
            url: url.to_string(),
            ..SongRecord::default()
        })
    }

    #[test]
    fn insert_keeps_row_on_replace() {
        let mut index = OrderedIndex::new();
        assert_eq!(index.insert("a".to_string(), 1), Upsert::Inserted(0));
        assert_eq!(index.insert("b".to_string(), 2), Upsert::Inserted(1));
        assert_eq!(index.insert("a".to_string(), 3), Upsert::Replaced(0, 1));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a"), Some(&3));
        assert_eq!(index.position("b"), Some(1));
        let keys: Vec<&String> = index.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn remove_shifts_later_rows() {
        let mut index = OrderedIndex::new();
        for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
            index.insert(key.to_string(), value);
        }
        assert_eq!(index.remove("a"), Some(1));
        assert_eq!(index.remove("zzz"), None);
        assert_eq!(index.position("b"), Some(0));
        assert_eq!(index.position("c"), Some(1));
        assert!(!index.contains_key("a"));
        assert_eq!(index.insert("d".to_string(), 4), Upsert::Inserted(2));
        let values: Vec<i32> = index.values().copied().collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn get_or_insert_reports_creation() {
        let mut index: OrderedIndex<String, Vec<u8>> = OrderedIndex::new();
        let key = "x".to_string();
        let (pos, value, created) = index.get_or_insert_with(&key, Vec::new);
        value.push(1);
        assert_eq!((pos, created), (0, true));
        let (pos, value, created) = index.get_or_insert_with(&key, Vec::new);
        assert_eq!((pos, created, value.len()), (0, false, 1));
    }

    #[test]
    fn entry_count_tracks_distinct_urls() {
        let mut entry = CollectionEntry::new(EntryKind::Artist, "A", None, "p.png".into());
        entry.attach(song("/m/1.mp3"));
        entry.attach(song("/m/2.mp3"));
        entry.attach(song("/m/1.mp3"));
        assert_eq!(entry.count, 2);
        assert_eq!(entry.count, entry.song_count());
        let urls: Vec<&str> = entry.songs().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["/m/1.mp3", "/m/2.mp3"]);

        assert!(entry.detach("/m/1.mp3").is_some());
        assert!(entry.detach("/m/1.mp3").is_none());
        assert_eq!(entry.count, 1);
        assert!(!entry.contains("/m/1.mp3"));
    }
}
