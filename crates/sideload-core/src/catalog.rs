//! Release catalog and per-entry status store
//!
//! The catalog is the single source of truth for "what exists and what state
//! it is in". Every status change goes through [`Catalog::set_status`] or
//! [`Catalog::transition_where`], both of which publish a
//! [`CatalogEvent::StatusChanged`] while the write lock is held, so
//! subscribers observe changes in the order they were applied.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::entry::{CatalogEntry, EntryStatus};
use crate::layout::{StorageLayout, RELEASE_MANIFEST};

/// Capacity of the event channel; a full refresh of a large catalog emits one event
const EVENT_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("unknown release: {0}")]
    UnknownEntry(String),
    #[error("release {release} is busy ({status:?})")]
    EntryBusy {
        release: String,
        status: EntryStatus,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A status change as seen by subscribers
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub entry: CatalogEntry,
    pub status: EntryStatus,
}

impl StatusChange {
    /// Download progress, or -1 when the status carries none
    pub fn progress_or_neg1(&self) -> i32 {
        self.status.progress().map(i32::from).unwrap_or(-1)
    }
}

/// Events published by the catalog
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    /// One entry changed status
    StatusChanged(StatusChange),
    /// The entry set was replaced
    Refreshed { count: usize },
}

#[derive(Default)]
struct CatalogState {
    entries: BTreeMap<String, CatalogEntry>,
    statuses: HashMap<String, EntryStatus>,
}

/// Release catalog with guarded status map
pub struct Catalog {
    layout: StorageLayout,
    state: RwLock<CatalogState>,
    event_tx: broadcast::Sender<CatalogEvent>,
}

impl Catalog {
    /// Create an empty catalog over the given storage layout
    pub fn new(layout: StorageLayout) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            layout,
            state: RwLock::new(CatalogState::default()),
            event_tx,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Subscribe to status and refresh events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.event_tx.subscribe()
    }

    /// Replace the whole entry set.
    ///
    /// Each entry starts at `Downloaded` if its release manifest exists on disk,
    /// otherwise `NoInfo`. Returns the number of entries loaded.
    pub fn replace_entries(&self, entries: Vec<CatalogEntry>) -> usize {
        let mut next = CatalogState::default();
        for entry in entries {
            let status = if self.layout.is_downloaded(&entry.release_name) {
                EntryStatus::Downloaded
            } else {
                EntryStatus::NoInfo
            };
            if next.entries.contains_key(&entry.release_name) {
                warn!(release = %entry.release_name, "Duplicate release in catalog, keeping the last row");
            }
            next.statuses.insert(entry.release_name.clone(), status);
            next.entries.insert(entry.release_name.clone(), entry);
        }

        let count = next.entries.len();
        {
            let mut state = self.write();
            *state = next;
            let _ = self.event_tx.send(CatalogEvent::Refreshed { count });
        }

        info!(count, "Loaded catalog entries");
        count
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, release_name: &str) -> bool {
        self.read().entries.contains_key(release_name)
    }

    /// Snapshot of every entry with its status, ordered by release name
    pub fn entries(&self) -> Vec<(CatalogEntry, EntryStatus)> {
        let state = self.read();
        state
            .entries
            .iter()
            .map(|(name, entry)| {
                let status = state.statuses.get(name).copied().unwrap_or_default();
                (entry.clone(), status)
            })
            .collect()
    }

    pub fn get(&self, release_name: &str) -> Option<CatalogEntry> {
        self.read().entries.get(release_name).cloned()
    }

    pub fn get_status(&self, release_name: &str) -> Option<EntryStatus> {
        self.read().statuses.get(release_name).copied()
    }

    /// Set the status of one entry and publish the change
    pub fn set_status(&self, release_name: &str, status: EntryStatus) -> Result<(), CatalogError> {
        let mut state = self.write();
        self.apply(&mut state, release_name, status)
    }

    /// Apply `transition` to every entry under one lock.
    ///
    /// The closure returns the new status for entries that should change.
    /// Returns how many entries were updated.
    pub fn transition_where<F>(&self, mut transition: F) -> usize
    where
        F: FnMut(&CatalogEntry, EntryStatus) -> Option<EntryStatus>,
    {
        let mut state = self.write();
        let updates: Vec<(String, EntryStatus)> = state
            .entries
            .iter()
            .filter_map(|(name, entry)| {
                let current = state.statuses.get(name).copied().unwrap_or_default();
                transition(entry, current).map(|next| (name.clone(), next))
            })
            .collect();

        let mut changed = 0;
        for (name, status) in updates {
            if self.apply(&mut state, &name, status).is_ok() {
                changed += 1;
            }
        }
        changed
    }

    fn apply(
        &self,
        state: &mut CatalogState,
        release_name: &str,
        status: EntryStatus,
    ) -> Result<(), CatalogError> {
        let entry = state
            .entries
            .get(release_name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownEntry(release_name.to_string()))?;
        state.statuses.insert(release_name.to_string(), status);
        debug!(release = %release_name, status = ?status, "Status changed");
        let _ = self
            .event_tx
            .send(CatalogEvent::StatusChanged(StatusChange { entry, status }));
        Ok(())
    }

    /// Files to hand to the device bridge for an extracted release, APKs first
    pub fn release_files(&self, release_name: &str) -> Result<Vec<PathBuf>, CatalogError> {
        if !self.contains(release_name) {
            return Err(CatalogError::UnknownEntry(release_name.to_string()));
        }

        let dir = self.layout.release_dir(release_name);
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_installable(path))
            .collect();

        files.sort_by_key(|path| (!has_extension(path, "apk"), path.clone()));
        Ok(files)
    }

    /// Thumbnail shipped with the metadata, if any
    pub fn thumbnail(&self, release_name: &str) -> Option<PathBuf> {
        let entry = self.get(release_name)?;
        let path = self.layout.thumbnail_path(&entry.package_name);
        path.exists().then_some(path)
    }

    /// Remove the extracted files of a release and reset it to `NoInfo`.
    ///
    /// Returns `Ok(false)` when nothing was on disk.
    pub fn delete(&self, release_name: &str) -> Result<bool, CatalogError> {
        // Held across the check and the reset so no step can start in between
        let mut state = self.write();
        if !state.entries.contains_key(release_name) {
            return Err(CatalogError::UnknownEntry(release_name.to_string()));
        }
        let status = state
            .statuses
            .get(release_name)
            .copied()
            .unwrap_or_default();

        if matches!(
            status,
            EntryStatus::Downloading { .. } | EntryStatus::Extracting | EntryStatus::Installing
        ) {
            return Err(CatalogError::EntryBusy {
                release: release_name.to_string(),
                status,
            });
        }

        let dir = self.layout.release_dir(release_name);
        if !dir.exists() {
            debug!(release = %release_name, "Nothing to delete");
            return Ok(false);
        }

        std::fs::remove_dir_all(&dir)?;
        info!(release = %release_name, path = %dir.display(), "Deleted release files");
        self.apply(&mut state, release_name, EntryStatus::NoInfo)?;
        Ok(true)
    }

    /// Delete every entry currently at `Downloaded`
    pub fn delete_all_downloaded(&self) -> Result<usize, CatalogError> {
        let targets: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|(_, status)| *status == EntryStatus::Downloaded)
            .map(|(entry, _)| entry.release_name)
            .collect();

        let mut deleted = 0;
        for release in targets {
            if self.delete(&release)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn has_extension(path: &std::path::Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn is_installable(path: &std::path::Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n == RELEASE_MANIFEST)
        .unwrap_or(true);
    if hidden {
        return false;
    }
    path.is_dir() || has_extension(path, "apk") || has_extension(path, "obb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(release: &str, package: &str) -> CatalogEntry {
        CatalogEntry {
            game_name: release.to_string(),
            release_name: release.to_string(),
            package_name: package.to_string(),
            version_code: 1,
            last_updated: "2025-01-01 00:00 UTC".to_string(),
            size_mb: 10,
            downloads: 1.0,
            rating: 4.0,
            rating_count: 3,
        }
    }

    fn catalog(temp_dir: &TempDir) -> Catalog {
        let layout = StorageLayout::new(temp_dir.path().join("cache"), temp_dir.path().join("dl"));
        layout.create_dirs().unwrap();
        Catalog::new(layout)
    }

    fn mark_downloaded(catalog: &Catalog, release: &str) {
        let dir = catalog.layout().release_dir(release);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(RELEASE_MANIFEST), b"").unwrap();
    }

    #[test]
    fn test_refresh_derives_status_from_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        mark_downloaded(&catalog, "b-2");

        let count = catalog.replace_entries(vec![entry("a-1", "com.a"), entry("b-2", "com.b")]);
        assert_eq!(count, 2);
        assert_eq!(catalog.get_status("a-1"), Some(EntryStatus::NoInfo));
        assert_eq!(catalog.get_status("b-2"), Some(EntryStatus::Downloaded));
        assert_eq!(catalog.get_status("missing"), None);
    }

    #[test]
    fn test_refresh_replaces_entries_and_resets_status() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        catalog.replace_entries(vec![entry("a-1", "com.a")]);
        catalog.set_status("a-1", EntryStatus::DownloadError).unwrap();

        catalog.replace_entries(vec![entry("a-1", "com.a"), entry("c-3", "com.c")]);
        assert_eq!(catalog.get_status("a-1"), Some(EntryStatus::NoInfo));
        assert_eq!(catalog.len(), 2);

        catalog.replace_entries(vec![entry("c-3", "com.c")]);
        assert!(!catalog.contains("a-1"));
    }

    #[test]
    fn test_set_status_publishes_event() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        catalog.replace_entries(vec![entry("a-1", "com.a")]);
        let mut rx = catalog.subscribe();

        catalog
            .set_status("a-1", EntryStatus::Downloading { progress: 40 })
            .unwrap();

        match rx.try_recv().unwrap() {
            CatalogEvent::StatusChanged(change) => {
                assert_eq!(change.entry.release_name, "a-1");
                assert_eq!(change.status, EntryStatus::Downloading { progress: 40 });
                assert_eq!(change.progress_or_neg1(), 40);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_set_status_unknown_entry() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        let mut rx = catalog.subscribe();
        assert!(matches!(
            catalog.set_status("nope", EntryStatus::Downloaded),
            Err(CatalogError::UnknownEntry(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_transition_where() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        catalog.replace_entries(vec![entry("a-1", "com.a"), entry("b-2", "com.b"), entry("c-3", "com.c")]);
        catalog.set_status("a-1", EntryStatus::Installing).unwrap();
        catalog.set_status("b-2", EntryStatus::Installed).unwrap();

        let changed = catalog.transition_where(|_, status| {
            status
                .is_at_least(EntryStatus::Installing)
                .then_some(EntryStatus::Downloaded)
        });
        assert_eq!(changed, 2);
        assert_eq!(catalog.get_status("a-1"), Some(EntryStatus::Downloaded));
        assert_eq!(catalog.get_status("b-2"), Some(EntryStatus::Downloaded));
        assert_eq!(catalog.get_status("c-3"), Some(EntryStatus::NoInfo));
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        mark_downloaded(&catalog, "a-1");
        catalog.replace_entries(vec![entry("a-1", "com.a"), entry("b-2", "com.b")]);

        assert!(catalog.delete("a-1").unwrap());
        assert_eq!(catalog.get_status("a-1"), Some(EntryStatus::NoInfo));
        assert!(!catalog.layout().release_dir("a-1").exists());

        // Never downloaded: no-op
        assert!(!catalog.delete("b-2").unwrap());
        assert!(matches!(catalog.delete("zzz"), Err(CatalogError::UnknownEntry(_))));
    }

    #[test]
    fn test_delete_rejects_active_entry() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        mark_downloaded(&catalog, "a-1");
        catalog.replace_entries(vec![entry("a-1", "com.a")]);
        catalog.set_status("a-1", EntryStatus::Installing).unwrap();

        assert!(matches!(catalog.delete("a-1"), Err(CatalogError::EntryBusy { .. })));
        assert!(catalog.layout().release_dir("a-1").exists());
    }

    #[test]
    fn test_delete_never_overwrites_active_status() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        mark_downloaded(&catalog, "a-1");
        catalog.replace_entries(vec![entry("a-1", "com.a")]);
        let mut rx = catalog.subscribe();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    let _ = catalog.set_status("a-1", EntryStatus::Downloading { progress: 0 });
                    let _ = catalog.set_status("a-1", EntryStatus::Downloaded);
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    mark_downloaded(&catalog, "a-1");
                    let _ = catalog.delete("a-1");
                }
            });
        });

        // A reset to NoInfo must never land directly on top of a running download
        let mut previous = None;
        while let Ok(event) = rx.try_recv() {
            if let CatalogEvent::StatusChanged(change) = event {
                if change.status == EntryStatus::NoInfo {
                    assert_ne!(previous, Some(EntryStatus::Downloading { progress: 0 }));
                }
                previous = Some(change.status);
            }
        }
    }

    #[test]
    fn test_delete_all_downloaded() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        mark_downloaded(&catalog, "a-1");
        mark_downloaded(&catalog, "b-2");
        catalog.replace_entries(vec![entry("a-1", "com.a"), entry("b-2", "com.b"), entry("c-3", "com.c")]);
        catalog.set_status("b-2", EntryStatus::Installed).unwrap();

        assert_eq!(catalog.delete_all_downloaded().unwrap(), 1);
        assert!(!catalog.layout().release_dir("a-1").exists());
        assert!(catalog.layout().release_dir("b-2").exists());
    }

    #[test]
    fn test_release_files_apks_first() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        mark_downloaded(&catalog, "a-1");
        catalog.replace_entries(vec![entry("a-1", "com.a")]);

        let dir = catalog.layout().release_dir("a-1");
        std::fs::create_dir_all(dir.join("com.a")).unwrap();
        std::fs::write(dir.join("game.apk"), b"").unwrap();
        std::fs::write(dir.join("notes.txt"), b"").unwrap();

        let files = catalog.release_files("a-1").unwrap();
        assert_eq!(files, vec![dir.join("game.apk"), dir.join("com.a")]);
    }

    #[test]
    fn test_thumbnail() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);
        catalog.replace_entries(vec![entry("a-1", "com.a")]);
        assert!(catalog.thumbnail("a-1").is_none());

        let thumb = catalog.layout().thumbnail_path("com.a");
        std::fs::create_dir_all(thumb.parent().unwrap()).unwrap();
        std::fs::write(&thumb, b"jpg").unwrap();
        assert_eq!(catalog.thumbnail("a-1"), Some(thumb));
    }
}
