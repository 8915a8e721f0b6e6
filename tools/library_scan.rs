use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use common::{Category, EntryKind};
use library::config::{config_path_from_env, resolve_music_root, resolve_path};
use library::{
    load_or_create_config, CoverStore, IndexingEngine, LibraryEvent, LibraryService,
    RedbSongStore, ScanSource, ServiceOptions, TagReader,
};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }

    let music_root = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| resolve_music_root(&config_path, &config.music_root))
        .ok_or("music_root not configured and no path argument")?;
    let index_path = resolve_path(&config_path, &config.index_path);
    let cover_dir = resolve_path(&config_path, &config.cover_dir);

    let store = RedbSongStore::open(&index_path)?;
    let covers = CoverStore::new(cover_dir);
    let (events_tx, mut events) = unbounded_channel();
    let mut engine = IndexingEngine::new(Arc::new(covers.clone()), events_tx);
    engine.set_progress_reporting(config.report_progress);
    let loaded = engine.load_from(&store)?;
    info!("Loaded {} songs from {:?}", loaded, index_path);

    let handle = LibraryService::spawn(
        engine,
        Arc::new(TagReader::new(covers)),
        Arc::new(store),
        ServiceOptions::from_config(&config),
    );
    handle.scan(ScanSource::Directory(music_root))?;

    let interrupted = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break false;
                };
                match event.to_json() {
                    Ok(line) => println!("{}", line),
                    Err(err) => warn!("Failed to encode event: {}", err),
                }
                if matches!(event, LibraryEvent::ScanFinished { .. }) {
                    break false;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; cancelling scan");
                handle.cancel()?;
                break true;
            }
        }
    };

    if !interrupted {
        for category in Category::ALL {
            let kind = match category {
                Category::Artist => EntryKind::Artist,
                Category::Album => EntryKind::Album,
                Category::Folder => EntryKind::Folder,
                Category::Song => continue,
            };
            let entries = handle.entries(kind).await?;
            println!("{}: {}", category.label(), entries.len());
        }
    }
    println!("Status: {:?}", handle.status());
    handle.shutdown().await?;
    Ok(())
}
