use std::sync::Arc;

use common::{EntryKind, SongRecord};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::engine::ScanSummary;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntrySummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub count: usize,
    pub cover: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum FieldChange {
    Count(usize),
    Cover(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LibraryEvent {
    SongAdded { song: Arc<SongRecord> },
    SongUpdated { song: Arc<SongRecord> },
    ArtistAdded { entry: EntrySummary },
    ArtistFieldChanged { index: usize, change: FieldChange },
    AlbumAdded { entry: EntrySummary },
    AlbumFieldChanged { index: usize, change: FieldChange },
    FolderAdded { entry: EntrySummary },
    FolderFieldChanged { index: usize, change: FieldChange },
    SongCountChanged { total: usize },
    ScanProgress { path: String },
    ScanFinished { summary: ScanSummary },
}

impl LibraryEvent {
    pub fn entry_added(kind: EntryKind, entry: EntrySummary) -> Self {
        match kind {
            EntryKind::Artist => LibraryEvent::ArtistAdded { entry },
            EntryKind::Album => LibraryEvent::AlbumAdded { entry },
            EntryKind::Folder => LibraryEvent::FolderAdded { entry },
        }
    }

    pub fn entry_changed(kind: EntryKind, index: usize, change: FieldChange) -> Self {
        match kind {
            EntryKind::Artist => LibraryEvent::ArtistFieldChanged { index, change },
            EntryKind::Album => LibraryEvent::AlbumFieldChanged { index, change },
            EntryKind::Folder => LibraryEvent::FolderFieldChanged { index, change },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub trait EventSink: Send {
    fn emit(&mut self, event: LibraryEvent);
}

impl EventSink for UnboundedSender<LibraryEvent> {
    fn emit(&mut self, event: LibraryEvent) {
        // A closed receiver means nobody is watching; indexing carries on.
        let _ = self.send(event);
    }
}

impl EventSink for Vec<LibraryEvent> {
    fn emit(&mut self, event: LibraryEvent) {
        self.push(event);
    }
}
