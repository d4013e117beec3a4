//! Contracts for the external tools the pipelines drive
//!
//! All calls are blocking. Async callers run them on the blocking pool.

use crate::device::DeviceId;
use crate::entry::CatalogEntry;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} not found: {reason}")]
    NotFound { tool: String, reason: String },
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("unsupported file type: {0}")]
    UnsupportedFile(PathBuf),
    #[error("unexpected {tool} output: {detail}")]
    Output { tool: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content sync/download tool
pub trait DownloadTool: Send + Sync {
    /// Copy the release identified by `source_id` into `dest_dir`, reporting
    /// whole-percent progress as it goes.
    fn copy(
        &self,
        source_id: &str,
        dest_dir: &Path,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<(), ToolError>;

    /// Mirror a single top-level file into `dest_dir`
    fn sync(&self, file_name: &str, dest_dir: &Path) -> Result<(), ToolError>;
}

/// Archive extraction tool
pub trait ArchiveTool: Send + Sync {
    fn extract(&self, archive: &Path, dest_dir: &Path, password: &str) -> Result<(), ToolError>;
}

/// Android device bridge
pub trait DeviceBridge: Send + Sync {
    /// Attached devices as `(serial, status token)` pairs
    fn list_devices(&self) -> Result<Vec<(String, String)>, ToolError>;

    /// Read a system property from a device
    fn get_property(&self, device: &DeviceId, name: &str) -> Result<String, ToolError>;

    /// Install APKs and push data files for `package_name`
    fn install_files(
        &self,
        package_name: &str,
        files: &[PathBuf],
        device: &DeviceId,
    ) -> Result<(), ToolError>;

    /// Package names of user-installed apps
    fn list_third_party_packages(&self, device: &DeviceId) -> Result<Vec<String>, ToolError>;

    fn start_server(&self) -> Result<(), ToolError>;

    fn kill_server(&self) -> Result<(), ToolError>;
}

/// Supplier of catalog rows for a refresh
pub trait CatalogSource: Send + Sync {
    /// Load every entry. `force` bypasses any cached copy of the metadata.
    fn load_entries(&self, force: bool) -> anyhow::Result<Vec<CatalogEntry>>;
}
