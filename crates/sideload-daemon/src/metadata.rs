//! Catalog metadata from the mirror
//!
//! The mirror publishes `meta.7z`, a password-protected archive holding the
//! game list and thumbnails. A refresh syncs the archive when needed, unpacks
//! it into `<cache>/metadata` and parses the game list.

use anyhow::{Context, Result};
use chrono::Utc;
use sideload_core::layout::METADATA_ARCHIVE;
use sideload_core::{load_game_list, ArchiveTool, CatalogEntry, CatalogSource, DownloadTool, StorageLayout};
use std::sync::Arc;
use tracing::{info, warn};

use crate::freshness::{is_stale, max_age, modified_at};

/// Catalog source backed by the mirror metadata archive
pub struct MirrorMetadata {
    downloader: Arc<dyn DownloadTool>,
    archiver: Arc<dyn ArchiveTool>,
    layout: StorageLayout,
    password: String,
    max_age: chrono::Duration,
}

impl MirrorMetadata {
    pub fn new(
        downloader: Arc<dyn DownloadTool>,
        archiver: Arc<dyn ArchiveTool>,
        layout: StorageLayout,
        password: impl Into<String>,
        max_age_hours: u64,
    ) -> Self {
        Self {
            downloader,
            archiver,
            layout,
            password: password.into(),
            max_age: max_age(max_age_hours),
        }
    }

    fn needs_sync(&self, force: bool) -> bool {
        if force {
            return true;
        }
        match modified_at(&self.layout.metadata_archive()) {
            Some(modified) => is_stale(modified, Utc::now(), self.max_age),
            None => true,
        }
    }

    fn sync_archive(&self, force: bool) -> Result<()> {
        if !self.needs_sync(force) {
            return Ok(());
        }

        info!(force, "Syncing mirror metadata");
        match self
            .downloader
            .sync(METADATA_ARCHIVE, self.layout.cache_dir())
        {
            Ok(()) => Ok(()),
            Err(e) if self.layout.metadata_archive().exists() => {
                warn!(error = %e, "Metadata sync failed, using the existing archive");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to download mirror metadata"),
        }
    }

    fn unpack(&self) -> Result<()> {
        let dir = self.layout.metadata_dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        self.archiver
            .extract(&self.layout.metadata_archive(), &dir, &self.password)
            .context("Failed to extract mirror metadata")
    }
}

impl CatalogSource for MirrorMetadata {
    fn load_entries(&self, force: bool) -> Result<Vec<CatalogEntry>> {
        self.sync_archive(force)?;
        self.unpack()?;

        let path = self.layout.game_list_path();
        let entries = load_game_list(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        info!(count = entries.len(), "Loaded game list");
        Ok(entries)
    }
}
