//! On-disk layout of the cache and download directories
//!
//! ```text
//! <cache>/meta.7z                         mirror metadata archive
//! <cache>/metadata/VRP-GameList.txt       extracted game list
//! <cache>/metadata/.meta/thumbnails/      per-package thumbnails
//! <cache>/<remote id>/*.7z.001            downloaded release archive
//! <download>/<release>/release.manifest   marks a completed extraction
//! ```

use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

/// File whose presence marks a release as downloaded
pub const RELEASE_MANIFEST: &str = "release.manifest";

/// Metadata archive name on the mirror
pub const METADATA_ARCHIVE: &str = "meta.7z";

/// Game list inside the metadata archive
pub const GAME_LIST_FILE: &str = "VRP-GameList.txt";

/// Extension of the first volume of a split release archive
pub const ARCHIVE_FIRST_VOLUME_EXT: &str = "001";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    cache_dir: PathBuf,
    download_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(cache_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Create both directories if missing
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(&self.download_dir)?;
        Ok(())
    }

    /// Directory the download tool copies a release archive into
    pub fn staging_dir(&self, remote_id: &str) -> PathBuf {
        self.cache_dir.join(remote_id)
    }

    /// Directory holding an extracted release
    pub fn release_dir(&self, release_name: &str) -> PathBuf {
        self.download_dir.join(release_name)
    }

    pub fn manifest_path(&self, release_name: &str) -> PathBuf {
        self.release_dir(release_name).join(RELEASE_MANIFEST)
    }

    /// Whether the release has been fully extracted
    pub fn is_downloaded(&self, release_name: &str) -> bool {
        self.manifest_path(release_name).exists()
    }

    pub fn metadata_archive(&self) -> PathBuf {
        self.cache_dir.join(METADATA_ARCHIVE)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.cache_dir.join("metadata")
    }

    pub fn game_list_path(&self) -> PathBuf {
        self.metadata_dir().join(GAME_LIST_FILE)
    }

    pub fn thumbnail_path(&self, package_name: &str) -> PathBuf {
        self.metadata_dir()
            .join(".meta")
            .join("thumbnails")
            .join(format!("{}.jpg", package_name))
    }
}

/// Identifier of a release on the mirror: hex MD5 of the release name plus a newline
pub fn remote_id(release_name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(release_name.as_bytes());
    hasher.update(b"\n");
    hex::encode(hasher.finalize())
}

/// First file in `dir` with the given extension, in name order
pub fn find_first_with_extension(dir: &Path, extension: &str) -> std::io::Result<Option<PathBuf>> {
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().map(|e| e == extension).unwrap_or(false))
        .collect();
    matches.sort();
    Ok(matches.into_iter().next())
}
