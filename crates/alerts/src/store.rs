//! File-backed tier configuration store.

use crate::config::{TierConfig, TierRef};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{error, info, warn};
use whalebot_core::{DestinationId, Tier};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Tier configuration backed by a JSON document.
///
/// Readers take an `Arc` snapshot and never observe a partially applied
/// reload. Edits are serialized in-process, written to a temp file and
/// renamed over the document before the snapshot is swapped.
pub struct TierStore {
    path: PathBuf,
    current: RwLock<Arc<TierConfig>>,
    write_lock: Mutex<()>,
}

impl TierStore {
    /// Open the store, loading the document (or built-in defaults).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = load_config(&path);
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
            write_lock: Mutex::new(()),
        }
    }

    /// Store that starts from `config` instead of reading `path`.
    pub fn with_config(path: impl Into<PathBuf>, config: TierConfig) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(config)),
            write_lock: Mutex::new(()),
        }
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<TierConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Read the document again and replace the snapshot wholesale.
    /// Waits for any in-flight edit so the edit cannot overwrite the reload.
    pub fn reload(&self) -> Arc<TierConfig> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let config = Arc::new(load_config(&self.path));
        self.replace(Arc::clone(&config));
        info!(
            path = %self.path.display(),
            tiers = config.tiers.len(),
            destinations = config.destinations.len(),
            "Tier configuration reloaded"
        );
        config
    }

    /// Assign a routing destination to a tier.
    pub fn set_destination_tier(
        &self,
        destination: DestinationId,
        tier: Tier,
    ) -> Result<Arc<TierConfig>, StoreError> {
        self.update(|config| {
            config.destinations.insert(destination, TierRef::Known(tier));
        })
    }

    /// Remove a routing destination. Returns whether it existed.
    pub fn remove_destination(&self, destination: &DestinationId) -> Result<bool, StoreError> {
        let mut removed = false;
        self.update(|config| {
            removed = config.destinations.remove(destination).is_some();
        })?;
        Ok(removed)
    }

    /// Assign a user to a tier.
    pub fn set_user_tier(
        &self,
        user: DestinationId,
        tier: Tier,
    ) -> Result<Arc<TierConfig>, StoreError> {
        self.update(|config| {
            config.users.insert(user, TierRef::Known(tier));
        })
    }

    /// Set or clear the fallback destination.
    pub fn set_default_destination(
        &self,
        destination: Option<DestinationId>,
    ) -> Result<Arc<TierConfig>, StoreError> {
        self.update(|config| {
            config.default_destination = destination;
        })
    }

    /// Apply an edit to a copy of the snapshot, persist it, then publish it.
    /// On a persist failure the published snapshot is left unchanged.
    fn update<F>(&self, edit: F) -> Result<Arc<TierConfig>, StoreError>
    where
        F: FnOnce(&mut TierConfig),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        let mut next = (*self.snapshot()).clone();
        edit(&mut next);

        if let Err(e) = write_atomic(&self.path, &next) {
            error!(path = %self.path.display(), error = %e, "Failed to persist tier configuration");
            return Err(e);
        }

        let next = Arc::new(next);
        self.replace(Arc::clone(&next));
        Ok(next)
    }

    fn replace(&self, config: Arc<TierConfig>) {
        match self.current.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

/// Load the tier document, falling back to built-in defaults on any failure.
pub fn load_config(path: &Path) -> TierConfig {
    if !path.exists() {
        info!(path = %path.display(), "No tier configuration found, using defaults");
        return TierConfig::builtin();
    }

    match fs::read_to_string(path) {
        Ok(content) => match TierConfig::from_json(&content) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    tiers = config.tiers.len(),
                    destinations = config.destinations.len(),
                    "Loaded tier configuration"
                );
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse tier configuration, using defaults");
                TierConfig::builtin()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read tier configuration, using defaults");
            TierConfig::builtin()
        }
    }
}

/// Write `config` next to `path` and rename it into place.
fn write_atomic(path: &Path, config: &TierConfig) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(&config.to_file())?;

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
        }
        return Err(io_err(e));
    }
    Ok(())
}
