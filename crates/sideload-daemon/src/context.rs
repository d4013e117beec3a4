//! Application context: builds and wires the services

use anyhow::{Context, Result};
use sideload_core::{Catalog, DeviceBridge, StorageLayout};
use sideload_discovery::{DeviceEvent, DeviceRegistry};
use sideload_queue::{Collaborators, QueueManager};
use sideload_tools::{AdbBridge, Rclone, SevenZip};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::resolve_credentials;
use crate::metadata::MirrorMetadata;

/// Shared application context
pub struct AppContext {
    pub catalog: Arc<Catalog>,
    pub registry: Arc<DeviceRegistry>,
    pub queue: Arc<QueueManager>,
    pub bridge: Arc<dyn DeviceBridge>,
    /// Catalog source for refreshes
    pub metadata: Arc<MirrorMetadata>,
    forwarder: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Build the device bridge and registry only; enough for device listing
pub fn build_registry(config: &Config) -> Result<(Arc<dyn DeviceBridge>, Arc<DeviceRegistry>)> {
    let bridge: Arc<dyn DeviceBridge> = Arc::new(
        AdbBridge::locate(config.tools.adb.as_deref()).context("Failed to locate adb")?,
    );
    let registry = Arc::new(DeviceRegistry::new(
        bridge.clone(),
        config.to_registry_config(),
    ));
    Ok((bridge, registry))
}

impl AppContext {
    /// Create directories, resolve tools and credentials, and build services.
    ///
    /// Any failure here is fatal.
    pub async fn new(config: &Config) -> Result<Arc<Self>> {
        let layout = StorageLayout::new(&config.paths.cache_dir, &config.paths.download_dir);
        layout.create_dirs().with_context(|| {
            format!(
                "Failed to create {} or {}",
                layout.cache_dir().display(),
                layout.download_dir().display()
            )
        })?;

        let credentials = resolve_credentials(&config.mirror, layout.cache_dir())
            .await
            .context("Failed to resolve mirror credentials")?;
        debug!(base_uri = %credentials.base_uri, "Mirror resolved");

        let (bridge, registry) = build_registry(config)?;
        let downloader = Arc::new(
            Rclone::locate(config.tools.rclone.as_deref(), credentials.base_uri.clone())
                .context("Failed to locate rclone")?,
        );
        let archiver = Arc::new(
            SevenZip::locate(config.tools.sevenzip.as_deref()).context("Failed to locate 7-Zip")?,
        );

        let metadata = Arc::new(MirrorMetadata::new(
            downloader.clone(),
            archiver.clone(),
            layout.clone(),
            credentials.password.clone(),
            config.mirror.metadata_max_age_hours,
        ));

        let catalog = Arc::new(Catalog::new(layout));
        let queue = Arc::new(QueueManager::new(
            catalog.clone(),
            Collaborators {
                downloader,
                archiver,
                bridge: bridge.clone(),
            },
            config.to_queue_config(&credentials.password),
        ));

        let context = Arc::new(Self {
            catalog,
            registry,
            queue,
            bridge,
            metadata,
            forwarder: std::sync::Mutex::new(None),
        });

        // Keep the queue's selected device in step with the registry
        let queue = context.queue.clone();
        let mut rx = context.registry.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DeviceEvent::ListChanged(devices)) => {
                        queue.on_device_list_changed(&devices).await
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Device event forwarder lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *context.forwarder.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(context)
    }

    /// Refresh the catalog from the mirror
    pub async fn refresh(&self, force: bool) -> Result<usize> {
        let count = self
            .queue
            .refresh_catalog(self.metadata.clone(), force)
            .await
            .context("Catalog refresh failed")?;
        Ok(count)
    }

    /// Start device polling and both queue workers
    pub fn start(&self) {
        self.registry.start();
        self.queue.start();
        info!("Services started");
    }

    /// Clear both queues and stop every background task
    pub async fn shutdown(&self) {
        self.queue.clear_download_queue();
        self.queue.clear_install_queue();
        self.queue.shutdown().await;
        self.registry.shutdown().await;

        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = forwarder {
            handle.abort();
        }
        info!("Services stopped");
    }
}
