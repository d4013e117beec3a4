//! Device registry that polls the bridge for attached devices

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sideload_core::{Device, DeviceBridge, DeviceId, DeviceStatus, ToolError};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Property holding the human-readable product model
pub const MODEL_PROPERTY: &str = "ro.product.model";

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Kill and restart the bridge server before the first poll
    pub reset_server_on_start: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            reset_server_on_start: true,
        }
    }
}

/// Device registry events
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device list changed; carries the new full list
    ListChanged(Vec<Device>),
}

/// Polling device registry.
///
/// Holds the canonical device list and replaces it wholesale whenever a poll
/// returns something different.
pub struct DeviceRegistry {
    bridge: Arc<dyn DeviceBridge>,
    config: RegistryConfig,
    devices: RwLock<Vec<Device>>,
    /// Held for the duration of a poll; server restarts wait on it
    poll_lock: Mutex<()>,
    event_tx: broadcast::Sender<DeviceEvent>,
    shutdown: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRegistry {
    pub fn new(bridge: Arc<dyn DeviceBridge>, config: RegistryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            bridge,
            config,
            devices: RwLock::new(Vec::new()),
            poll_lock: Mutex::new(()),
            event_tx,
            shutdown: CancellationToken::new(),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Subscribe to device events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Current device list
    pub async fn devices(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    /// Get a specific device
    pub async fn get_device(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().await.iter().find(|d| &d.id == id).cloned()
    }

    /// Poll the bridge once.
    ///
    /// Returns `true` when the device list changed. A failed poll leaves the
    /// previous list in place.
    pub async fn poll_once(&self) -> Result<bool> {
        let _guard = self.poll_lock.lock().await;

        let bridge = self.bridge.clone();
        let polled = tokio::task::spawn_blocking(move || read_devices(bridge.as_ref())).await??;

        let mut devices = self.devices.write().await;
        if *devices == polled {
            return Ok(false);
        }

        info!(count = polled.len(), "Device list changed");
        *devices = polled.clone();
        let _ = self.event_tx.send(DeviceEvent::ListChanged(polled));
        Ok(true)
    }

    /// Kill and restart the bridge server, waiting for any in-flight poll
    pub async fn restart_server(&self) -> Result<()> {
        let _guard = self.poll_lock.lock().await;
        info!("Restarting device bridge server");

        let bridge = self.bridge.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ToolError> {
            if let Err(e) = bridge.kill_server() {
                // Nothing to kill is fine
                debug!(error = %e, "Bridge server kill failed");
            }
            bridge.start_server()
        })
        .await??;
        Ok(())
    }

    /// Start the background poll loop.
    ///
    /// The first poll runs immediately; later polls follow the configured
    /// interval. Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            warn!("Device registry already started");
            return;
        }

        let registry = Arc::clone(self);
        *task = Some(tokio::spawn(async move { registry.run().await }));
    }

    async fn run(&self) {
        if self.config.reset_server_on_start {
            if let Err(e) = self.restart_server().await {
                warn!(error = %e, "Failed to reset device bridge server");
            }
        }

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(interval_ms = self.config.poll_interval_ms, "Device poll loop started");

        loop {
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "Device poll failed");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        info!("Device poll loop stopped");
    }

    /// Stop the poll loop and wait for it to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Device poll task ended abnormally");
            }
        }
    }
}

/// List devices and resolve the model of every authorized one
fn read_devices(bridge: &dyn DeviceBridge) -> Result<Vec<Device>, ToolError> {
    let listed = bridge.list_devices()?;
    let mut devices = Vec::with_capacity(listed.len());

    for (serial, token) in listed {
        let id = DeviceId::from_serial(&serial);
        let status = DeviceStatus::from_token(&token).unwrap_or_else(|| {
            warn!(device = %id, token = %token, "Unrecognized device status");
            DeviceStatus::Unknown
        });

        let model = if status == DeviceStatus::Ok {
            match bridge.get_property(&id, MODEL_PROPERTY) {
                Ok(model) => model,
                Err(e) => {
                    warn!(device = %id, error = %e, "Failed to read device model");
                    String::new()
                }
            }
        } else {
            String::new()
        };

        devices.push(Device::new(id, model, status));
    }

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::sync::Mutex as StdMutex;

    type Hold = (mpsc::Sender<()>, mpsc::Receiver<()>);

    /// Bridge returning scripted device lists; `None` simulates a tool failure
    #[derive(Default)]
    struct FakeBridge {
        polls: StdMutex<VecDeque<Option<Vec<(String, String)>>>>,
        calls: StdMutex<Vec<String>>,
        /// Parks the next `list_devices` until released
        hold: StdMutex<Option<Hold>>,
    }

    impl FakeBridge {
        fn scripted(polls: Vec<Option<Vec<(&str, &str)>>>) -> Arc<Self> {
            let polls = polls
                .into_iter()
                .map(|p| {
                    p.map(|list| {
                        list.into_iter()
                            .map(|(a, b)| (a.to_string(), b.to_string()))
                            .collect()
                    })
                })
                .collect();
            Arc::new(Self {
                polls: StdMutex::new(polls),
                calls: StdMutex::new(Vec::new()),
                hold: StdMutex::new(None),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeviceBridge for FakeBridge {
        fn list_devices(&self) -> Result<Vec<(String, String)>, ToolError> {
            let hold = self.hold.lock().unwrap().take();
            if let Some((reached, release)) = hold {
                let _ = reached.send(());
                let _ = release.recv();
            }
            // Recorded on return
            self.calls.lock().unwrap().push("devices".to_string());
            match self.polls.lock().unwrap().pop_front() {
                Some(Some(list)) => Ok(list),
                Some(None) => Err(ToolError::Failed {
                    tool: "adb".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "error: protocol fault".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }

        fn get_property(&self, device: &DeviceId, name: &str) -> Result<String, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("getprop {} {}", device, name));
            Ok("Quest 3".to_string())
        }

        fn install_files(&self, _: &str, _: &[PathBuf], _: &DeviceId) -> Result<(), ToolError> {
            Ok(())
        }

        fn list_third_party_packages(&self, _: &DeviceId) -> Result<Vec<String>, ToolError> {
            Ok(Vec::new())
        }

        fn start_server(&self) -> Result<(), ToolError> {
            self.calls.lock().unwrap().push("start-server".to_string());
            Ok(())
        }

        fn kill_server(&self) -> Result<(), ToolError> {
            self.calls.lock().unwrap().push("kill-server".to_string());
            Ok(())
        }
    }

    fn registry(bridge: Arc<FakeBridge>) -> DeviceRegistry {
        DeviceRegistry::new(bridge, RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_change_fires_exactly_once() {
        let bridge = FakeBridge::scripted(vec![
            Some(vec![]),
            Some(vec![("A", "device")]),
            Some(vec![("A", "device")]),
        ]);
        let registry = registry(bridge);
        let mut rx = registry.subscribe();

        assert!(!registry.poll_once().await.unwrap());
        assert!(registry.poll_once().await.unwrap());
        assert!(!registry.poll_once().await.unwrap());

        match rx.try_recv().unwrap() {
            DeviceEvent::ListChanged(devices) => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].id.as_str(), "A");
                assert_eq!(devices[0].status, DeviceStatus::Ok);
                assert_eq!(devices[0].model, "Quest 3");
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_model_only_for_authorized_devices() {
        let bridge = FakeBridge::scripted(vec![Some(vec![("A", "unauthorized"), ("B", "device")])]);
        let registry = registry(bridge.clone());
        registry.poll_once().await.unwrap();

        let devices = registry.devices().await;
        assert_eq!(devices[0].model, "");
        assert_eq!(devices[0].status, DeviceStatus::UnAuthorized);
        assert_eq!(devices[1].model, "Quest 3");

        let calls = bridge.calls();
        assert_eq!(calls, vec!["devices", "getprop B ro.product.model"]);
    }

    #[tokio::test]
    async fn test_unknown_token_maps_to_unknown() {
        let bridge = FakeBridge::scripted(vec![Some(vec![("A", "recovery")])]);
        let registry = registry(bridge);
        registry.poll_once().await.unwrap();

        let device = registry.get_device(&DeviceId::from_serial("A")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_snapshot() {
        let bridge = FakeBridge::scripted(vec![Some(vec![("A", "device")]), None]);
        let registry = registry(bridge);
        let mut rx = registry.subscribe();

        registry.poll_once().await.unwrap();
        assert!(registry.poll_once().await.is_err());

        assert_eq!(registry.devices().await.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restart_server_kills_then_starts() {
        let bridge = FakeBridge::scripted(vec![]);
        let registry = registry(bridge.clone());
        registry.restart_server().await.unwrap();
        assert_eq!(bridge.calls(), vec!["kill-server", "start-server"]);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let bridge = FakeBridge::scripted(vec![Some(vec![("A", "offline")])]);
        let registry = Arc::new(DeviceRegistry::new(
            bridge.clone(),
            RegistryConfig {
                poll_interval_ms: 10,
                reset_server_on_start: true,
            },
        ));
        let mut rx = registry.subscribe();

        registry.start();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no device event")
            .unwrap();
        let DeviceEvent::ListChanged(devices) = event;
        assert_eq!(devices[0].status, DeviceStatus::Offline);

        registry.shutdown().await;
        let calls = bridge.calls();
        assert_eq!(&calls[..2], &["kill-server", "start-server"]);
    }

    #[tokio::test]
    async fn test_restart_waits_for_running_poll() {
        let bridge = FakeBridge::scripted(vec![Some(vec![("A", "device")])]);
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *bridge.hold.lock().unwrap() = Some((reached_tx, release_rx));
        let registry = Arc::new(registry(bridge.clone()));

        let polling = registry.clone();
        let poll = tokio::spawn(async move { polling.poll_once().await });
        tokio::task::spawn_blocking(move || reached_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let restarting = registry.clone();
        let restart = tokio::spawn(async move { restarting.restart_server().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bridge.calls().is_empty());

        release_tx.send(()).unwrap();
        assert!(poll.await.unwrap().unwrap());
        restart.await.unwrap().unwrap();

        let calls = bridge.calls();
        assert_eq!(
            calls,
            vec![
                "devices",
                "getprop A ro.product.model",
                "kill-server",
                "start-server"
            ]
        );
    }
}
