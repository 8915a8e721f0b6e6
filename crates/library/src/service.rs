use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::{Category, EntryKind, SongRecord};
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LibraryConfig;
use crate::covers::CoverRequest;
use crate::engine::{IndexingEngine, Playlist, ScanSummary, Selection};
use crate::events::EntrySummary;
use crate::extract::{ExtractError, SongReader};
use crate::scanner::{ScanSource, Scanner};
use crate::store::SongStore;
use crate::LibraryError;

#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub scanner: Scanner,
    pub workers: usize,
    pub extract_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&LibraryConfig::default())
    }
}

impl ServiceOptions {
    pub fn from_config(config: &LibraryConfig) -> Self {
        Self {
            scanner: Scanner::from_config(config),
            workers: config.extract_workers.max(1),
            extract_timeout: config.extract_timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServiceStatus {
    Idle,
    Scanning { started: SystemTime, processed: usize },
    Ready(ScanSummary),
    Error(String),
}

enum Command {
    Scan(ScanSource),
    Cancel,
    CoverResolved(CoverRequest),
    SetView(Category),
    Songs(Selection, oneshot::Sender<Option<Vec<Arc<SongRecord>>>>),
    Playlist(Selection, oneshot::Sender<Option<Playlist>>),
    Entries(EntryKind, oneshot::Sender<Vec<EntrySummary>>),
    Flush(oneshot::Sender<Result<usize, LibraryError>>),
    Shutdown(oneshot::Sender<()>),
}

pub struct LibraryService;

impl LibraryService {
    // Must be called from inside a tokio runtime.
    pub fn spawn(
        engine: IndexingEngine,
        reader: Arc<dyn SongReader>,
        store: Arc<dyn SongStore>,
        options: ServiceOptions,
    ) -> LibraryHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(ServiceStatus::Idle));
        let handle = LibraryHandle {
            commands: tx,
            status: Arc::clone(&status),
            scanner: options.scanner.clone(),
        };
        let worker = Worker {
            engine,
            reader,
            store,
            options,
            status,
            queued: VecDeque::new(),
            shutdown: None,
        };
        tokio::spawn(worker.run(rx));
        handle
    }
}

#[derive(Clone)]
pub struct LibraryHandle {
    commands: UnboundedSender<Command>,
    status: Arc<RwLock<ServiceStatus>>,
    scanner: Scanner,
}

impl LibraryHandle {
    pub fn scan(&self, source: ScanSource) -> Result<(), LibraryError> {
        self.scanner.check_source(&source)?;
        self.send(Command::Scan(source))
    }

    pub fn cancel(&self) -> Result<(), LibraryError> {
        self.send(Command::Cancel)
    }

    pub fn cover_resolved(&self, request: CoverRequest) -> Result<(), LibraryError> {
        self.send(Command::CoverResolved(request))
    }

    pub fn set_view(&self, view: Category) -> Result<(), LibraryError> {
        self.send(Command::SetView(view))
    }

    pub async fn songs_for(
        &self,
        selection: Selection,
    ) -> Result<Option<Vec<Arc<SongRecord>>>, LibraryError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Songs(selection, tx))?;
        rx.await.map_err(|_| LibraryError::ServiceStopped)
    }

    pub async fn playlist_for(&self, selection: Selection) -> Result<Option<Playlist>, LibraryError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Playlist(selection, tx))?;
        rx.await.map_err(|_| LibraryError::ServiceStopped)
    }

    pub async fn entries(&self, kind: EntryKind) -> Result<Vec<EntrySummary>, LibraryError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Entries(kind, tx))?;
        rx.await.map_err(|_| LibraryError::ServiceStopped)
    }

    pub async fn flush(&self) -> Result<usize, LibraryError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        rx.await.map_err(|_| LibraryError::ServiceStopped)?
    }

    pub async fn shutdown(&self) -> Result<(), LibraryError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| LibraryError::ServiceStopped)
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    fn send(&self, command: Command) -> Result<(), LibraryError> {
        self.commands
            .send(command)
            .map_err(|_| LibraryError::ServiceStopped)
    }
}

struct Worker {
    engine: IndexingEngine,
    reader: Arc<dyn SongReader>,
    store: Arc<dyn SongStore>,
    options: ServiceOptions,
    status: Arc<RwLock<ServiceStatus>>,
    queued: VecDeque<ScanSource>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Worker {
    async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            if let Some(source) = self.queued.pop_front() {
                if !self.run_scan(source, &mut commands).await {
                    break;
                }
                continue;
            }
            let Some(command) = commands.recv().await else {
                break;
            };
            if !self.handle(command, None) {
                break;
            }
        }

        if let Err(err) = self.engine.flush(self.store.as_ref()) {
            warn!("Final flush failed: {}", err);
        }
        info!("Library service stopped");
        if let Some(done) = self.shutdown.take() {
            let _ = done.send(());
        }
    }

    // Returns false once the service should stop.
    fn handle(&mut self, command: Command, batch: Option<&CancellationToken>) -> bool {
        match command {
            Command::Scan(source) => {
                if batch.is_some() {
                    info!("Scan of {:?} queued behind the running batch", source);
                }
                self.queued.push_back(source);
            }
            Command::Cancel => {
                self.queued.clear();
                if let Some(token) = batch {
                    token.cancel();
                }
            }
            Command::CoverResolved(request) => {
                self.engine.cover_resolved(&request);
            }
            Command::SetView(view) => self.engine.set_view(view),
            Command::Songs(selection, reply) => {
                let _ = reply.send(self.engine.songs_for(&selection));
            }
            Command::Playlist(selection, reply) => {
                let _ = reply.send(self.engine.playlist_for(&selection));
            }
            Command::Entries(kind, reply) => {
                let _ = reply.send(self.engine.entries(kind));
            }
            Command::Flush(reply) => {
                let _ = reply.send(self.engine.flush(self.store.as_ref()));
            }
            Command::Shutdown(done) => {
                self.queued.clear();
                if let Some(token) = batch {
                    token.cancel();
                }
                self.shutdown = Some(done);
                return false;
            }
        }
        true
    }

    async fn run_scan(
        &mut self,
        source: ScanSource,
        commands: &mut UnboundedReceiver<Command>,
    ) -> bool {
        if let Err(err) = self.engine.begin_batch() {
            warn!("Cannot start scan of {:?}: {}", source, err);
            return true;
        }
        info!("Library scan started: {:?}", source);
        *self.status.write() = ServiceStatus::Scanning {
            started: SystemTime::now(),
            processed: 0,
        };

        let cancel = CancellationToken::new();
        let (path_tx, path_rx) = mpsc::channel::<PathBuf>(self.options.workers.max(1) * 2);
        let scanner = self.options.scanner.clone();
        let walk_cancel = cancel.clone();
        let walker = tokio::task::spawn_blocking(move || -> Result<(), LibraryError> {
            for path in scanner.scan(&source, walk_cancel)? {
                if path_tx.blocking_send(path).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut running = true;
        {
            let reader = Arc::clone(&self.reader);
            let limit = self.options.extract_timeout;
            let outcomes = ReceiverStream::new(path_rx)
                .map(move |path| extract_with_watchdog(Arc::clone(&reader), path, limit))
                .buffered(self.options.workers.max(1));
            tokio::pin!(outcomes);

            let mut commands_open = true;
            let mut processed = 0usize;
            while !cancel.is_cancelled() {
                tokio::select! {
                    outcome = outcomes.next() => {
                        let Some((path, outcome)) = outcome else {
                            break;
                        };
                        self.engine.ingest(&path, outcome);
                        processed += 1;
                        if let ServiceStatus::Scanning { processed: count, .. } =
                            &mut *self.status.write()
                        {
                            *count = processed;
                        }
                    }
                    command = commands.recv(), if commands_open => match command {
                        Some(command) => {
                            if !self.handle(command, Some(&cancel)) {
                                running = false;
                            }
                        }
                        None => commands_open = false,
                    },
                }
            }
        }

        let walk_result = match walker.await {
            Ok(result) => result,
            Err(err) => Err(LibraryError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                err.to_string(),
            ))),
        };

        let store = Arc::clone(&self.store);
        if let Err(err) = walk_result {
            warn!("Library scan failed: {}", err);
            if let Err(flush_err) = self.engine.abort_batch(store.as_ref()) {
                warn!("Failed to save partial scan: {}", flush_err);
            }
            *self.status.write() = ServiceStatus::Error(err.to_string());
        } else if cancel.is_cancelled() {
            if let Err(err) = self.engine.abort_batch(store.as_ref()) {
                warn!("Failed to save cancelled scan: {}", err);
            }
            *self.status.write() = ServiceStatus::Idle;
        } else {
            let status = match self.engine.finish_batch(store.as_ref()) {
                Ok(summary) => ServiceStatus::Ready(summary),
                Err(err) => ServiceStatus::Error(err.to_string()),
            };
            *self.status.write() = status;
        }
        running
    }
}

async fn extract_with_watchdog(
    reader: Arc<dyn SongReader>,
    path: PathBuf,
    limit: Duration,
) -> (PathBuf, Result<SongRecord, ExtractError>) {
    let task_path = path.clone();
    let task = tokio::task::spawn_blocking(move || reader.read_song(&task_path));
    let outcome = match tokio::time::timeout(limit, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => Err(ExtractError::Worker(err.to_string())),
        Err(_) => {
            warn!("Extraction of {:?} exceeded {:?}", path, limit);
            Err(ExtractError::TimedOut(limit))
        }
    };
    (path, outcome)
}
