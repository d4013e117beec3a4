//! Catalog entries and their lifecycle status

use serde::{Deserialize, Serialize};

/// One installable release known to the catalog.
///
/// Entries are created in bulk by a catalog refresh and never mutated
/// afterwards; the next refresh replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Display name of the game
    pub game_name: String,
    /// Release name, the natural key of the catalog
    pub release_name: String,
    /// Android package name
    pub package_name: String,
    /// Android version code
    pub version_code: i32,
    /// Upload date as published by the mirror
    pub last_updated: String,
    /// Download size in megabytes
    pub size_mb: i32,
    /// Popularity score
    pub downloads: f32,
    pub rating: f32,
    pub rating_count: i32,
}

/// Lifecycle stage of a catalog entry.
///
/// Variants are declared in pipeline order; [`EntryStatus::rank`] exposes
/// that order so callers can ask "at or beyond Downloaded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    NoInfo,
    DownloadQueued,
    Downloading { progress: u8 },
    DownloadError,
    Extracting,
    ExtractingError,
    Downloaded,
    InstallQueued,
    Installing,
    InstallingError,
    Installed,
}

impl Default for EntryStatus {
    fn default() -> Self {
        Self::NoInfo
    }
}

impl EntryStatus {
    /// Position in the pipeline, ignoring download progress
    pub fn rank(&self) -> u8 {
        match self {
            Self::NoInfo => 0,
            Self::DownloadQueued => 1,
            Self::Downloading { .. } => 2,
            Self::DownloadError => 3,
            Self::Extracting => 4,
            Self::ExtractingError => 5,
            Self::Downloaded => 6,
            Self::InstallQueued => 7,
            Self::Installing => 8,
            Self::InstallingError => 9,
            Self::Installed => 10,
        }
    }

    /// True when `self` is `other` or later in the pipeline
    pub fn is_at_least(&self, other: EntryStatus) -> bool {
        self.rank() >= other.rank()
    }

    /// Download progress, if the entry is downloading
    pub fn progress(&self) -> Option<u8> {
        match self {
            Self::Downloading { progress } => Some(*progress),
            _ => None,
        }
    }

    /// Whether the download worker may pick this entry up
    pub fn is_downloadable(&self) -> bool {
        matches!(
            self,
            Self::NoInfo | Self::DownloadError | Self::DownloadQueued
        )
    }

    /// Whether the status is one of the error states
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::DownloadError | Self::ExtractingError | Self::InstallingError
        )
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoInfo => Ok(()),
            Self::DownloadQueued => f.write_str("Download Queued"),
            Self::Downloading { progress } => write!(f, "Downloading ({}%)", progress),
            Self::DownloadError => f.write_str("Download Error"),
            Self::Extracting => f.write_str("Extracting"),
            Self::ExtractingError => f.write_str("Extracting Error"),
            Self::Downloaded => f.write_str("Downloaded"),
            Self::InstallQueued => f.write_str("Install Queued"),
            Self::Installing => f.write_str("Installing"),
            Self::InstallingError => f.write_str("Install Error"),
            Self::Installed => f.write_str("Installed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_follows_pipeline_order() {
        assert!(EntryStatus::Installed.is_at_least(EntryStatus::Downloaded));
        assert!(EntryStatus::InstallQueued.is_at_least(EntryStatus::Downloaded));
        assert!(EntryStatus::Downloaded.is_at_least(EntryStatus::Downloaded));
        assert!(!EntryStatus::ExtractingError.is_at_least(EntryStatus::Downloaded));
        assert!(!EntryStatus::Downloading { progress: 100 }.is_at_least(EntryStatus::Extracting));
        assert_eq!(
            EntryStatus::Downloading { progress: 3 }.rank(),
            EntryStatus::Downloading { progress: 97 }.rank()
        );
    }

    #[test]
    fn test_downloadable_states() {
        assert!(EntryStatus::NoInfo.is_downloadable());
        assert!(EntryStatus::DownloadError.is_downloadable());
        assert!(EntryStatus::DownloadQueued.is_downloadable());
        assert!(!EntryStatus::Downloading { progress: 0 }.is_downloadable());
        assert!(!EntryStatus::Downloaded.is_downloadable());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(EntryStatus::NoInfo.to_string(), "");
        assert_eq!(
            EntryStatus::Downloading { progress: 19 }.to_string(),
            "Downloading (19%)"
        );
        assert_eq!(EntryStatus::DownloadError.to_string(), "Download Error");
        assert_eq!(EntryStatus::InstallingError.to_string(), "Install Error");
    }

    #[test]
    fn test_progress_only_while_downloading() {
        assert_eq!(EntryStatus::Downloading { progress: 50 }.progress(), Some(50));
        assert_eq!(EntryStatus::Extracting.progress(), None);
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_string(&EntryStatus::Downloading { progress: 7 }).unwrap();
        assert_eq!(json, r#"{"state":"downloading","progress":7}"#);
    }
}
