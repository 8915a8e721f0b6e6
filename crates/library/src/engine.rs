use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{path_to_string, AlbumKey, Category, EntryKind, SongRecord};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::covers::{CoverKey, CoverRequest, CoverResolver};
use crate::events::{EntrySummary, EventSink, FieldChange, LibraryEvent};
use crate::extract::{ExtractError, SongReader};
use crate::index::{CollectionEntry, OrderedIndex, Upsert};
use crate::store::SongStore;
use crate::LibraryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Scanning,
    Finalizing,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub indexed: usize,
    pub failed: usize,
    pub failures: Vec<FileFailure>,
    pub total_songs: usize,
    pub saved: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    Artist(String),
    Album(AlbumKey),
    Folder(String),
    Song(String),
}

#[derive(Clone, Debug)]
pub struct Playlist {
    pub songs: Vec<Arc<SongRecord>>,
    pub start_url: String,
}

pub struct IndexingEngine {
    songs: OrderedIndex<String, Arc<SongRecord>>,
    artists: OrderedIndex<String, CollectionEntry>,
    albums: OrderedIndex<AlbumKey, CollectionEntry>,
    folders: OrderedIndex<String, CollectionEntry>,
    pending: OrderedIndex<String, Arc<SongRecord>>,
    state: BatchState,
    summary: ScanSummary,
    view: Category,
    report_progress: bool,
    requested: HashSet<CoverRequest>,
    covers: Arc<dyn CoverResolver>,
    sink: Box<dyn EventSink>,
    cover_requests: Option<UnboundedSender<CoverRequest>>,
}

impl IndexingEngine {
    pub fn new(covers: Arc<dyn CoverResolver>, sink: impl EventSink + 'static) -> Self {
        Self {
            songs: OrderedIndex::new(),
            artists: OrderedIndex::new(),
            albums: OrderedIndex::new(),
            folders: OrderedIndex::new(),
            pending: OrderedIndex::new(),
            state: BatchState::Idle,
            summary: ScanSummary::default(),
            view: Category::Song,
            report_progress: true,
            requested: HashSet::new(),
            covers,
            sink: Box::new(sink),
            cover_requests: None,
        }
    }

    pub fn with_cover_requests(mut self, requests: UnboundedSender<CoverRequest>) -> Self {
        self.cover_requests = Some(requests);
        self
    }

    pub fn set_progress_reporting(&mut self, enabled: bool) {
        self.report_progress = enabled;
    }

    pub fn set_view(&mut self, view: Category) {
        self.view = view;
    }

    pub fn view(&self) -> Category {
        self.view
    }

    pub fn categories(&self) -> &'static [Category] {
        &Category::ALL
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn song(&self, url: &str) -> Option<Arc<SongRecord>> {
        self.songs.get(url).cloned()
    }

    pub fn artist(&self, name: &str) -> Option<&CollectionEntry> {
        self.artists.get(name)
    }

    pub fn album(&self, key: &AlbumKey) -> Option<&CollectionEntry> {
        self.albums.get(key)
    }

    pub fn folder(&self, path: &str) -> Option<&CollectionEntry> {
        self.folders.get(path)
    }

    pub fn entries(&self, kind: EntryKind) -> Vec<EntrySummary> {
        match kind {
            EntryKind::Artist => self.artists.values().map(CollectionEntry::summary).collect(),
            EntryKind::Album => self.albums.values().map(CollectionEntry::summary).collect(),
            EntryKind::Folder => self.folders.values().map(CollectionEntry::summary).collect(),
        }
    }

    // Rebuilds every index from persistence without emitting events. Songs
    // still waiting for a successful flush are laid back on top.
    pub fn load_from(&mut self, store: &dyn SongStore) -> Result<usize, LibraryError> {
        if self.state != BatchState::Idle {
            return Err(LibraryError::ScanInProgress);
        }
        let songs = store.select_all_songs()?;
        let artists = store.select_all_artists()?;
        let albums = store.select_all_albums()?;
        let folders = store.select_all_folders()?;

        self.songs.clear();
        self.artists.clear();
        self.albums.clear();
        self.folders.clear();

        for song in songs {
            self.songs.insert(song.url.clone(), Arc::new(song));
        }

        for (name, records) in artists {
            let cover = self.covers.cover_or_placeholder(&CoverKey::Artist(&name));
            let mut entry =
                CollectionEntry::new(EntryKind::Artist, &name, None, path_to_string(&cover));
            for record in records {
                entry.attach(self.shared(record));
            }
            self.artists.insert(name, entry);
        }

        for (key, records) in albums {
            let cover = self.covers.cover_or_placeholder(&CoverKey::Album {
                artist: &key.artist,
                album: &key.name,
            });
            let mut entry = CollectionEntry::new(
                EntryKind::Album,
                &key.name,
                Some(&key.artist),
                path_to_string(&cover),
            );
            for record in records {
                entry.attach(self.shared(record));
            }
            self.albums.insert(key, entry);
        }

        let folder_cover = path_to_string(&self.covers.folder_cover());
        for (name, records) in folders {
            let mut entry =
                CollectionEntry::new(EntryKind::Folder, &name, None, folder_cover.clone());
            for record in records {
                entry.attach(self.shared(record));
            }
            self.folders.insert(name, entry);
        }

        let unsaved: Vec<Arc<SongRecord>> = self.pending.values().cloned().collect();
        if !unsaved.is_empty() {
            warn!("Keeping {} unsaved songs on top of the stored library", unsaved.len());
        }
        for song in &unsaved {
            self.upsert(song);
        }

        info!(
            "Loaded library: {} songs, {} artists, {} albums, {} folders",
            self.songs.len(),
            self.artists.len(),
            self.albums.len(),
            self.folders.len()
        );
        Ok(self.songs.len())
    }

    pub fn begin_batch(&mut self) -> Result<(), LibraryError> {
        if self.state != BatchState::Idle {
            return Err(LibraryError::ScanInProgress);
        }
        self.state = BatchState::Scanning;
        self.summary = ScanSummary::default();
        self.requested.clear();
        Ok(())
    }

    pub fn ingest(&mut self, path: &Path, outcome: Result<SongRecord, ExtractError>) {
        if self.report_progress {
            self.sink.emit(LibraryEvent::ScanProgress {
                path: path_to_string(path),
            });
        }
        match outcome {
            Ok(song) => {
                self.index_song(song);
            }
            Err(err) => self.record_failure(path, &err),
        }
    }

    pub fn index_song(&mut self, song: SongRecord) -> Arc<SongRecord> {
        let song = Arc::new(song);
        for event in self.upsert(&song) {
            self.sink.emit(event);
        }
        self.pending.insert(song.url.clone(), Arc::clone(&song));

        self.sink.emit(LibraryEvent::SongCountChanged {
            total: self.songs.len(),
        });
        self.summary.indexed += 1;

        if self.view == Category::Artist
            && !self.covers.cover_exists(&CoverKey::Artist(&song.artist))
        {
            self.request_cover(CoverRequest::Artist {
                artist: song.artist.clone(),
            });
        }

        song
    }

    pub fn record_failure(&mut self, path: &Path, err: &ExtractError) {
        warn!("Failed to read tags for {:?}: {}", path, err);
        self.summary.failed += 1;
        self.summary.failures.push(FileFailure {
            path: path_to_string(path),
            error: err.to_string(),
        });
    }

    // On failure the songs stay pending, so a later call retries them.
    pub fn flush(&mut self, store: &dyn SongStore) -> Result<usize, LibraryError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let songs: Vec<SongRecord> = self.pending.values().map(|song| (**song).clone()).collect();
        if let Err(err) = store.save_songs(&songs) {
            warn!("Failed to save {} songs: {}", songs.len(), err);
            return Err(err);
        }
        self.pending.clear();
        debug!("Saved {} songs", songs.len());
        Ok(songs.len())
    }

    pub fn finish_batch(&mut self, store: &dyn SongStore) -> Result<ScanSummary, LibraryError> {
        self.state = BatchState::Finalizing;
        let result = self.flush(store);

        let mut summary = std::mem::take(&mut self.summary);
        summary.total_songs = self.songs.len();
        summary.saved = result.is_ok();
        if summary.saved {
            self.backfill_album_covers();
        }
        self.state = BatchState::Idle;

        info!(
            "Scan finished: {} indexed, {} failed, {} songs total",
            summary.indexed, summary.failed, summary.total_songs
        );
        self.sink.emit(LibraryEvent::ScanFinished {
            summary: summary.clone(),
        });
        result.map(|_| summary)
    }

    pub fn abort_batch(&mut self, store: &dyn SongStore) -> Result<usize, LibraryError> {
        self.state = BatchState::Finalizing;
        let result = self.flush(store);
        let summary = std::mem::take(&mut self.summary);
        self.state = BatchState::Idle;
        info!(
            "Scan cancelled after {} indexed, {} failed",
            summary.indexed, summary.failed
        );
        result
    }

    // Returns None when the paths were not exhausted because `cancel` fired.
    pub fn run_batch<I>(
        &mut self,
        paths: I,
        reader: &dyn SongReader,
        store: &dyn SongStore,
        cancel: &CancellationToken,
    ) -> Result<Option<ScanSummary>, LibraryError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.begin_batch()?;
        let mut stopped = false;
        for path in paths {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }
            let outcome = reader.read_song(&path);
            self.ingest(&path, outcome);
        }
        if stopped {
            self.abort_batch(store)?;
            return Ok(None);
        }
        self.finish_batch(store).map(Some)
    }

    // An artist cover also refreshes every artist row whose name contains
    // the resolved artist, each with its own cached cover.
    pub fn cover_resolved(&mut self, request: &CoverRequest) -> bool {
        self.requested.remove(request);
        let updated = match request {
            CoverRequest::Artist { artist } => {
                let rows: Vec<(usize, String)> = self
                    .artists
                    .keys()
                    .enumerate()
                    .filter(|(_, name)| name.contains(artist.as_str()))
                    .map(|(pos, name)| (pos, name.clone()))
                    .collect();
                let mut updated = false;
                for (pos, name) in rows {
                    let key = CoverKey::Artist(&name);
                    if !self.covers.cover_exists(&key) {
                        continue;
                    }
                    let path = path_to_string(&self.covers.resolve_path(&key));
                    updated |= self.set_cover(EntryKind::Artist, pos, path);
                }
                updated
            }
            CoverRequest::Album { artist, album } => {
                let key = request.key();
                match self.albums.position(&AlbumKey::new(artist, album)) {
                    Some(pos) if self.covers.cover_exists(&key) => {
                        let path = path_to_string(&self.covers.resolve_path(&key));
                        self.set_cover(EntryKind::Album, pos, path)
                    }
                    _ => false,
                }
            }
        };
        if !updated {
            debug!("No cover update for {:?}", request);
        }
        updated
    }

    pub fn songs_for(&self, selection: &Selection) -> Option<Vec<Arc<SongRecord>>> {
        let entry = match selection {
            Selection::Artist(name) => self.artists.get(name.as_str()),
            Selection::Album(key) => self.albums.get(key),
            Selection::Folder(path) => self.folders.get(path.as_str()),
            Selection::Song(url) => {
                return self.songs.get(url.as_str()).map(|song| vec![Arc::clone(song)]);
            }
        }?;
        Some(entry.songs().cloned().collect())
    }

    pub fn playlist_for(&self, selection: &Selection) -> Option<Playlist> {
        let songs = self.songs_for(selection)?;
        let start_url = songs.first()?.url.clone();
        Some(Playlist { songs, start_url })
    }

    fn upsert(&mut self, song: &Arc<SongRecord>) -> Vec<LibraryEvent> {
        let mut events = Vec::with_capacity(6);
        match self.songs.insert(song.url.clone(), Arc::clone(song)) {
            Upsert::Inserted(_) => events.push(LibraryEvent::SongAdded {
                song: Arc::clone(song),
            }),
            Upsert::Replaced(_, old) => {
                events.push(LibraryEvent::SongUpdated {
                    song: Arc::clone(song),
                });
                self.detach_moved(&old, song, &mut events);
            }
        }

        let covers = &self.covers;
        events.push(attach_song(&mut self.artists, &song.artist, song, || {
            let cover = covers.cover_or_placeholder(&CoverKey::Artist(&song.artist));
            CollectionEntry::new(EntryKind::Artist, &song.artist, None, path_to_string(&cover))
        }));

        let album_key = song.album_key();
        events.push(attach_song(&mut self.albums, &album_key, song, || {
            let cover = covers.cover_or_placeholder(&CoverKey::Album {
                artist: &song.artist,
                album: &song.album,
            });
            CollectionEntry::new(
                EntryKind::Album,
                &song.album,
                Some(&song.artist),
                path_to_string(&cover),
            )
        }));

        events.push(attach_song(&mut self.folders, &song.folder, song, || {
            let cover = covers.folder_cover();
            CollectionEntry::new(EntryKind::Folder, &song.folder, None, path_to_string(&cover))
        }));
        events
    }

    // Entries stay even when they drop to zero songs.
    fn detach_moved(&mut self, old: &SongRecord, song: &SongRecord, events: &mut Vec<LibraryEvent>) {
        if old.artist != song.artist {
            events.extend(detach_song(&mut self.artists, old.artist.as_str(), &old.url));
        }
        let old_album = old.album_key();
        if old_album != song.album_key() {
            events.extend(detach_song(&mut self.albums, &old_album, &old.url));
        }
        if old.folder != song.folder {
            events.extend(detach_song(&mut self.folders, old.folder.as_str(), &old.url));
        }
    }

    fn set_cover(&mut self, kind: EntryKind, pos: usize, path: String) -> bool {
        let entry = match kind {
            EntryKind::Album => self.albums.get_index_mut(pos),
            _ => self.artists.get_index_mut(pos),
        };
        let Some(entry) = entry else {
            return false;
        };
        if entry.cover == path {
            return false;
        }
        entry.cover = path.clone();
        self.sink
            .emit(LibraryEvent::entry_changed(kind, pos, FieldChange::Cover(path)));
        true
    }

    fn backfill_album_covers(&mut self) {
        if self.cover_requests.is_none() {
            return;
        }
        let missing: Vec<CoverRequest> = self
            .albums
            .keys()
            .filter(|key| {
                !self.covers.cover_exists(&CoverKey::Album {
                    artist: &key.artist,
                    album: &key.name,
                })
            })
            .map(|key| CoverRequest::Album {
                artist: key.artist.clone(),
                album: key.name.clone(),
            })
            .collect();
        for request in missing {
            self.request_cover(request);
        }
    }

    fn request_cover(&mut self, request: CoverRequest) {
        let Some(queue) = &self.cover_requests else {
            return;
        };
        if !self.requested.insert(request.clone()) {
            return;
        }
        if queue.send(request).is_err() {
            debug!("Cover request queue closed");
        }
    }

    fn shared(&self, record: SongRecord) -> Arc<SongRecord> {
        match self.songs.get(record.url.as_str()) {
            Some(song) => Arc::clone(song),
            None => Arc::new(record),
        }
    }
}

fn attach_song<K, F>(
    index: &mut OrderedIndex<K, CollectionEntry>,
    key: &K,
    song: &Arc<SongRecord>,
    create: F,
) -> LibraryEvent
where
    K: Eq + Hash + Clone,
    F: FnOnce() -> CollectionEntry,
{
    let (pos, entry, created) = index.get_or_insert_with(key, create);
    entry.attach(Arc::clone(song));
    debug_assert_eq!(entry.count, entry.song_count());
    if created {
        LibraryEvent::entry_added(entry.kind, entry.summary())
    } else {
        LibraryEvent::entry_changed(entry.kind, pos, FieldChange::Count(entry.count))
    }
}

fn detach_song<K, Q>(
    index: &mut OrderedIndex<K, CollectionEntry>,
    key: &Q,
    url: &str,
) -> Option<LibraryEvent>
where
    K: Eq + Hash + Clone + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
{
    let pos = index.position(key)?;
    let entry = index.get_index_mut(pos)?;
    entry.detach(url)?;
    Some(LibraryEvent::entry_changed(
        entry.kind,
        pos,
        FieldChange::Count(entry.count),
    ))
}
