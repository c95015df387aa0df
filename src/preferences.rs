// =============================================================================
// Preferences Store — explicit, injectable favorite-city persistence
// =============================================================================
//
// Replaces ambient global preference state with a store constructed in main
// and handed to whoever needs it.  Every mutation is persisted immediately
// with an atomic tmp + rename write, so a crash never leaves a half-written
// favorites file.  A missing file at startup simply means no favorites yet.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How many favorites the dashboard surfaces (the most recent ones).
const RECENT_LIMIT: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferencesFile {
    #[serde(default)]
    favorite_cities: Vec<String>,
}

/// Favorite-city list with write-through JSON persistence.
pub struct PreferencesStore {
    path: PathBuf,
    favorites: RwLock<Vec<String>>,
}

impl PreferencesStore {
    /// Open the store at `path`, loading existing favorites if the file is
    /// present.  A missing file yields an empty list; a corrupt file is
    /// logged and treated as empty rather than blocking startup.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let favorites = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<PreferencesFile>(&content) {
                Ok(file) => {
                    info!(
                        path = %path.display(),
                        count = file.favorite_cities.len(),
                        "favorites loaded"
                    );
                    file.favorite_cities
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "favorites file corrupt; starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            path,
            favorites: RwLock::new(favorites),
        }
    }

    /// Add a favorite.  Returns `false` if it was already present (no write).
    pub fn add(&self, city: &str) -> Result<bool> {
        {
            let mut favorites = self.favorites.write();
            if favorites.iter().any(|c| c == city) {
                return Ok(false);
            }
            favorites.push(city.to_string());
        }
        self.save()?;
        Ok(true)
    }

    /// Remove a favorite.  Returns `false` if it was not present (no write).
    pub fn remove(&self, city: &str) -> Result<bool> {
        {
            let mut favorites = self.favorites.write();
            let before = favorites.len();
            favorites.retain(|c| c != city);
            if favorites.len() == before {
                return Ok(false);
            }
        }
        self.save()?;
        Ok(true)
    }

    /// The full favorites list, oldest first.
    pub fn all(&self) -> Vec<String> {
        self.favorites.read().clone()
    }

    /// The most recently added favorites, capped at the dashboard limit.
    pub fn recent(&self) -> Vec<String> {
        let favorites = self.favorites.read();
        let skip = favorites.len().saturating_sub(RECENT_LIMIT);
        favorites[skip..].to_vec()
    }

    /// Persist the current list with an atomic tmp + rename write.
    fn save(&self) -> Result<()> {
        let file = PreferencesFile {
            favorite_cities: self.favorites.read().clone(),
        };
        let content =
            serde_json::to_string_pretty(&file).context("failed to serialise favorites")?;

        let tmp_path = self.path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content).with_context(|| {
            format!("failed to write tmp favorites to {}", tmp_path.display())
        })?;

        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("failed to rename tmp favorites to {}", self.path.display())
        })?;

        Ok(())
    }
}
