//! Download and install pipelines
//!
//! Two queues, each drained by its own worker task. A worker takes at most
//! one release per tick and sleeps the full tick interval between attempts.
//! All status changes go through [`Catalog::set_status`] /
//! [`Catalog::transition_where`].

use serde::{Deserialize, Serialize};
use sideload_core::layout::{find_first_with_extension, ARCHIVE_FIRST_VOLUME_EXT};
use sideload_core::{
    remote_id, ArchiveTool, Catalog, CatalogError, CatalogSource, Device, DeviceBridge, DeviceId,
    DeviceStatus, DownloadTool, EntryStatus, ToolError,
};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("unknown release: {0}")]
    UnknownEntry(String),
    #[error("device {device} is not ready ({status})")]
    DeviceNotReady {
        device: DeviceId,
        status: DeviceStatus,
    },
    #[error("no device selected")]
    NoDeviceSelected,
    #[error("device {0} is not the selected device")]
    DeviceNotSelected(DeviceId),
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Worker tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Password for release archives
    pub archive_password: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            archive_password: String::new(),
        }
    }
}

/// External tools driven by the pipelines
#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn DownloadTool>,
    pub archiver: Arc<dyn ArchiveTool>,
    pub bridge: Arc<dyn DeviceBridge>,
}

pub struct QueueManager {
    catalog: Arc<Catalog>,
    tools: Collaborators,
    config: QueueConfig,
    download_queue: Mutex<VecDeque<String>>,
    install_queue: Mutex<VecDeque<String>>,
    selected: RwLock<Option<Device>>,
    /// Held while the selection and its reconciliation change together
    selection: tokio::sync::Mutex<()>,
    /// Held while a download step runs
    download_busy: tokio::sync::Mutex<()>,
    /// Held while an install step runs
    install_busy: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(catalog: Arc<Catalog>, tools: Collaborators, config: QueueConfig) -> Self {
        Self {
            catalog,
            tools,
            config,
            download_queue: Mutex::new(VecDeque::new()),
            install_queue: Mutex::new(VecDeque::new()),
            selected: RwLock::new(None),
            selection: tokio::sync::Mutex::new(()),
            download_busy: tokio::sync::Mutex::new(()),
            install_busy: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Queue a release for download and mark it `DownloadQueued`
    pub fn enqueue_download(&self, release_name: &str) -> Result<(), QueueError> {
        if !self.catalog.contains(release_name) {
            return Err(QueueError::UnknownEntry(release_name.to_string()));
        }

        let mut queue = lock(&self.download_queue);
        queue.push_back(release_name.to_string());
        self.catalog
            .set_status(release_name, EntryStatus::DownloadQueued)?;
        debug!(release = %release_name, depth = queue.len(), "Download queued");
        Ok(())
    }

    /// Queue a release for install on `device` and mark it `InstallQueued`.
    ///
    /// The device must be ready and must be the selected device.
    pub fn enqueue_install(&self, release_name: &str, device: &Device) -> Result<(), QueueError> {
        if !self.catalog.contains(release_name) {
            return Err(QueueError::UnknownEntry(release_name.to_string()));
        }
        if !device.is_ready() {
            return Err(QueueError::DeviceNotReady {
                device: device.id.clone(),
                status: device.status,
            });
        }
        match self.selected_device() {
            None => return Err(QueueError::NoDeviceSelected),
            Some(selected) if selected.id != device.id => {
                return Err(QueueError::DeviceNotSelected(device.id.clone()))
            }
            Some(_) => {}
        }

        let mut queue = lock(&self.install_queue);
        queue.push_back(release_name.to_string());
        self.catalog
            .set_status(release_name, EntryStatus::InstallQueued)?;
        debug!(release = %release_name, device = %device.id, depth = queue.len(), "Install queued");
        Ok(())
    }

    /// Currently selected device
    pub fn selected_device(&self) -> Option<Device> {
        self.selected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Select the install target and reconcile statuses against it.
    ///
    /// With a device, every entry at `Downloaded` or beyond becomes `Installed`
    /// if its package is on the device and `Downloaded` otherwise. With `None`
    /// those entries all become `Downloaded`. Returns the number of entries
    /// found installed.
    pub async fn select_device(&self, device: Option<Device>) -> Result<usize, QueueError> {
        let _selection = self.selection.lock().await;
        let Some(device) = device else {
            self.set_selected(None);
            let reset = self.reset_installed();
            info!(reset, "Device selection cleared");
            return Ok(0);
        };

        if !device.is_ready() {
            return Err(QueueError::DeviceNotReady {
                device: device.id.clone(),
                status: device.status,
            });
        }

        let installed = self.reconcile(&device).await?;
        info!(device = %device.id, model = %device.model, installed, "Device selected");
        self.set_selected(Some(device));
        Ok(installed)
    }

    async fn reconcile(&self, device: &Device) -> Result<usize, QueueError> {
        let bridge = self.tools.bridge.clone();
        let id = device.id.clone();
        let packages: HashSet<String> =
            run_blocking(move || bridge.list_third_party_packages(&id))
                .await?
                .into_iter()
                .collect();

        let mut installed = 0;
        self.catalog.transition_where(|entry, status| {
            if !status.is_at_least(EntryStatus::Downloaded) {
                return None;
            }
            if packages.contains(&entry.package_name) {
                installed += 1;
                Some(EntryStatus::Installed)
            } else {
                Some(EntryStatus::Downloaded)
            }
        });
        Ok(installed)
    }

    fn reset_installed(&self) -> usize {
        self.catalog.transition_where(|_, status| {
            status
                .is_at_least(EntryStatus::Downloaded)
                .then_some(EntryStatus::Downloaded)
        })
    }

    fn set_selected(&self, device: Option<Device>) {
        *self.selected.write().unwrap_or_else(|e| e.into_inner()) = device;
    }

    /// Follow the selected device across device list changes.
    ///
    /// The snapshot is refreshed by id; when the device is gone the selection
    /// is cleared the same way as `select_device(None)`.
    pub async fn on_device_list_changed(&self, devices: &[Device]) {
        let _selection = self.selection.lock().await;
        let Some(selected) = self.selected_device() else {
            return;
        };

        match devices.iter().find(|d| d.id == selected.id) {
            Some(current) => {
                if current.status != selected.status {
                    info!(device = %current.id, status = %current.status, "Selected device changed state");
                }
                self.set_selected(Some(current.clone()));
            }
            None => {
                warn!(device = %selected.id, "Selected device disconnected");
                self.set_selected(None);
                self.reset_installed();
            }
        }
    }

    /// Drop all pending downloads. In-flight work is not interrupted and
    /// dropped entries keep their `DownloadQueued` status.
    pub fn clear_download_queue(&self) -> usize {
        let mut queue = lock(&self.download_queue);
        let dropped = queue.len();
        queue.clear();
        if dropped > 0 {
            info!(dropped, "Download queue cleared");
        }
        dropped
    }

    /// Drop all pending installs and put every entry at or beyond
    /// `Installing` back to `Downloaded`
    pub fn clear_install_queue(&self) -> usize {
        let mut queue = lock(&self.install_queue);
        let dropped = queue.len();
        queue.clear();
        let reset = self.catalog.transition_where(|_, status| {
            status
                .is_at_least(EntryStatus::Installing)
                .then_some(EntryStatus::Downloaded)
        });
        if dropped > 0 || reset > 0 {
            info!(dropped, reset, "Install queue cleared");
        }
        dropped
    }

    /// Pending downloads, next first
    pub fn queued_downloads(&self) -> Vec<String> {
        lock(&self.download_queue).iter().cloned().collect()
    }

    /// Pending installs, next first
    pub fn queued_installs(&self) -> Vec<String> {
        lock(&self.install_queue).iter().cloned().collect()
    }

    /// Replace the catalog from `source`.
    ///
    /// Both queues are cleared and any in-flight step is awaited first. Anything
    /// queued while the source was loading is dropped as well. If a device is
    /// selected its installed packages are applied again.
    pub async fn refresh_catalog(
        &self,
        source: Arc<dyn CatalogSource>,
        force: bool,
    ) -> Result<usize, QueueError> {
        self.clear_download_queue();
        self.clear_install_queue();

        let _download = self.download_busy.lock().await;
        let _install = self.install_busy.lock().await;

        let entries = tokio::task::spawn_blocking(move || source.load_entries(force)).await??;

        let _selection = self.selection.lock().await;
        let count = {
            // Enqueueing holds these too, so nothing slips in before the swap
            let mut downloads = lock(&self.download_queue);
            let mut installs = lock(&self.install_queue);
            if !downloads.is_empty() || !installs.is_empty() {
                info!(
                    downloads = downloads.len(),
                    installs = installs.len(),
                    "Dropping releases queued during refresh"
                );
            }
            downloads.clear();
            installs.clear();
            self.catalog.replace_entries(entries)
        };

        if let Some(device) = self.selected_device() {
            if let Err(e) = self.reconcile(&device).await {
                warn!(device = %device.id, error = %e, "Failed to reconcile after refresh");
            }
        }

        Ok(count)
    }

    /// Take the next valid download and run it to a terminal status.
    ///
    /// Queued releases whose status no longer allows a download are dropped.
    /// Returns the release processed, if any.
    pub async fn run_download_once(&self) -> Option<String> {
        let _busy = self.download_busy.lock().await;
        let release = self.next_queued(&self.download_queue, |s| s.is_downloadable())?;
        info!(release = %release, "Starting download");

        let status = match self.download(&release).await {
            Ok(()) => EntryStatus::Downloaded,
            Err(failed) => failed,
        };
        self.set_status(&release, status);
        Some(release)
    }

    async fn download(&self, release: &str) -> Result<(), EntryStatus> {
        self.set_status(release, EntryStatus::Downloading { progress: 0 });

        let layout = self.catalog.layout().clone();
        let id = remote_id(release);
        let staging = layout.staging_dir(&id);

        let downloader = self.tools.downloader.clone();
        let catalog = self.catalog.clone();
        let name = release.to_string();
        let dest = staging.clone();
        let copied = run_blocking(move || {
            let mut on_progress = |progress: u8| {
                let _ = catalog.set_status(&name, EntryStatus::Downloading { progress });
            };
            downloader.copy(&id, &dest, &mut on_progress)
        })
        .await;
        if let Err(e) = copied {
            error!(release = %release, error = %e, "Download failed");
            return Err(EntryStatus::DownloadError);
        }

        self.set_status(release, EntryStatus::Extracting);
        let archive = match find_first_with_extension(&staging, ARCHIVE_FIRST_VOLUME_EXT) {
            Ok(Some(archive)) => archive,
            Ok(None) => {
                error!(release = %release, dir = %staging.display(), "No archive found after download");
                return Err(EntryStatus::ExtractingError);
            }
            Err(e) => {
                error!(release = %release, dir = %staging.display(), error = %e, "Failed to read download directory");
                return Err(EntryStatus::ExtractingError);
            }
        };

        let archiver = self.tools.archiver.clone();
        let dest = layout.download_dir().to_path_buf();
        let password = self.config.archive_password.clone();
        let extracted = run_blocking(move || archiver.extract(&archive, &dest, &password)).await;
        if let Err(e) = extracted {
            error!(release = %release, error = %e, "Extraction failed");
            return Err(EntryStatus::ExtractingError);
        }

        if let Err(e) = std::fs::remove_dir_all(&staging) {
            warn!(release = %release, dir = %staging.display(), error = %e, "Failed to remove downloaded archive");
        }
        info!(release = %release, "Download complete");
        Ok(())
    }

    /// Take the next valid install and run it against the selected device.
    ///
    /// Does nothing while no ready device is selected.
    pub async fn run_install_once(&self) -> Option<String> {
        let _busy = self.install_busy.lock().await;
        let device = self.selected_device().filter(Device::is_ready)?;
        let release = self.next_queued(&self.install_queue, |s| *s == EntryStatus::InstallQueued)?;
        info!(release = %release, device = %device.id, "Starting install");

        self.set_status(&release, EntryStatus::Installing);
        let status = match self.install(&release, &device).await {
            Ok(()) => {
                info!(release = %release, device = %device.id, "Install complete");
                EntryStatus::Installed
            }
            Err(e) => {
                error!(release = %release, device = %device.id, error = %e, "Install failed");
                EntryStatus::InstallingError
            }
        };
        self.set_status(&release, status);
        Some(release)
    }

    async fn install(&self, release: &str, device: &Device) -> Result<(), QueueError> {
        let entry = self
            .catalog
            .get(release)
            .ok_or_else(|| QueueError::UnknownEntry(release.to_string()))?;
        let files = self.catalog.release_files(release)?;

        let bridge = self.tools.bridge.clone();
        let id = device.id.clone();
        run_blocking(move || bridge.install_files(&entry.package_name, &files, &id)).await
    }

    /// Pop queued releases until one passes `ready`; stale ones are dropped
    fn next_queued(
        &self,
        queue: &Mutex<VecDeque<String>>,
        ready: impl Fn(&EntryStatus) -> bool,
    ) -> Option<String> {
        let mut queue = lock(queue);
        while let Some(release) = queue.pop_front() {
            match self.catalog.get_status(&release) {
                Some(status) if ready(&status) => return Some(release),
                status => debug!(release = %release, ?status, "Skipping stale queue item"),
            }
        }
        None
    }

    fn set_status(&self, release: &str, status: EntryStatus) {
        if let Err(e) = self.catalog.set_status(release, status) {
            // Entry vanished in a refresh while its step was running
            warn!(release = %release, error = %e, "Dropped status update");
        }
    }

    /// Spawn the download and install workers. Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            warn!("Queue workers already started");
            return;
        }

        let interval = Duration::from_millis(self.config.tick_interval_ms);

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            info!("Download worker started");
            while manager.tick(interval).await {
                manager.run_download_once().await;
            }
            info!("Download worker stopped");
        }));

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            info!("Install worker started");
            while manager.tick(interval).await {
                manager.run_install_once().await;
            }
            info!("Install worker stopped");
        }));
    }

    /// Sleep one tick; false once shutdown is requested
    async fn tick(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = sleep(interval) => true,
        }
    }

    /// Stop both workers and wait for them. Queues are left as they are.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Queue worker ended abnormally");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_blocking<T, F>(f: F) -> Result<T, QueueError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}
