use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scanner::{DEFAULT_EXTENSIONS, MIN_FILE_SIZE};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub version: u32,
    pub music_root: String,
    pub index_path: String,
    pub cover_dir: String,
    pub extensions: Vec<String>,
    pub min_file_size: u64,
    pub extract_workers: usize,
    pub extract_timeout_secs: u64,
    pub report_progress: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_root: "".to_string(),
            index_path: "library.redb".to_string(),
            cover_dir: "covers".to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            min_file_size: MIN_FILE_SIZE,
            extract_workers: DEFAULT_WORKERS,
            extract_timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
            report_progress: true,
        }
    }
}

impl LibraryConfig {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MUSIC_LIBRARY_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(LibraryConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: LibraryConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = "library.redb".to_string();
        }
        if config.cover_dir.trim().is_empty() {
            config.cover_dir = "covers".to_string();
        }
        config.extensions = config
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if config.extensions.is_empty() {
            config.extensions = LibraryConfig::default().extensions;
        }
        if config.extract_workers == 0 {
            config.extract_workers = DEFAULT_WORKERS;
        }
        if config.extract_timeout_secs == 0 {
            config.extract_timeout_secs = DEFAULT_EXTRACT_TIMEOUT_SECS;
        }
        return Ok((config, false));
    }

    let config = LibraryConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &LibraryConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_music_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config, LibraryConfig::default());
        assert_eq!(config.min_file_size, 1024 * 1024);

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again, config);
    }

    #[test]
    fn zero_and_empty_values_are_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "music_root: /srv/music\nindex_path: ''\nextensions: ['.MP3', ' ']\nextract_workers: 0\nextract_timeout_secs: 0\n",
        )
        .unwrap();

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.music_root, "/srv/music");
        assert_eq!(config.index_path, "library.redb");
        assert_eq!(config.extensions, vec!["mp3".to_string()]);
        assert_eq!(config.extract_workers, DEFAULT_WORKERS);
        assert_eq!(config.extract_timeout(), Duration::from_secs(30));
        assert!(config.report_progress);
    }

    #[test]
    fn relative_paths_resolve_next_to_config() {
        let config_path = Path::new("/etc/library/config.yaml");
        assert_eq!(
            resolve_path(config_path, "library.redb"),
            PathBuf::from("/etc/library/library.redb")
        );
        assert_eq!(resolve_path(config_path, "/abs/x"), PathBuf::from("/abs/x"));
        assert_eq!(resolve_music_root(config_path, "  "), None);
    }
}
