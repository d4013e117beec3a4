//! Command implementations

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sideload_core::{Catalog, CatalogEntry, CatalogEvent, Device, DeviceId, EntryStatus};
use sideload_discovery::{DeviceEvent, DeviceRegistry};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{build_registry, AppContext};

/// Row of `list --json`
#[derive(Debug, Serialize)]
struct ListRow {
    #[serde(flatten)]
    entry: CatalogEntry,
    status: EntryStatus,
    status_text: String,
}

/// Poll once and look up a device by id
async fn find_device(registry: &DeviceRegistry, id: &str) -> Result<Device> {
    registry.poll_once().await.context("Failed to list devices")?;
    registry
        .get_device(&DeviceId::from_serial(id))
        .await
        .with_context(|| format!("Device {} not found", id))
}

pub async fn devices(config: &Config) -> Result<()> {
    let (_, registry) = build_registry(config)?;
    registry.poll_once().await.context("Failed to list devices")?;

    let devices = registry.devices().await;
    println!("Found {} devices:", devices.len());
    for device in devices {
        if device.model.is_empty() {
            println!("  - {} [{}]", device.id, device.status);
        } else {
            println!("  - {} {} [{}]", device.id, device.model, device.status);
        }
    }
    Ok(())
}

pub async fn list(
    config: &Config,
    filter: Option<&str>,
    device: Option<&str>,
    json: bool,
    force_metadata: bool,
) -> Result<()> {
    let ctx = AppContext::new(config).await?;
    ctx.refresh(force_metadata).await?;

    if let Some(id) = device {
        let device = find_device(&ctx.registry, id).await?;
        ctx.queue.select_device(Some(device)).await?;
    }

    let needle = filter.map(str::to_lowercase);
    let rows: Vec<ListRow> = ctx
        .catalog
        .entries()
        .into_iter()
        .filter(|(entry, _)| match &needle {
            Some(needle) => {
                entry.game_name.to_lowercase().contains(needle)
                    || entry.release_name.to_lowercase().contains(needle)
            }
            None => true,
        })
        .map(|(entry, status)| ListRow {
            entry,
            status,
            status_text: status.to_string(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{:<60} {:>8}  {}", "RELEASE", "SIZE MB", "STATUS");
        for row in &rows {
            println!(
                "{:<60} {:>8}  {}",
                row.entry.release_name, row.entry.size_mb, row.status_text
            );
        }
        println!("{} entries", rows.len());
    }

    ctx.shutdown().await;
    Ok(())
}

pub async fn info(config: &Config, release: &str) -> Result<()> {
    let ctx = AppContext::new(config).await?;
    ctx.refresh(false).await?;

    let entry = ctx
        .catalog
        .get(release)
        .with_context(|| format!("Unknown release: {}", release))?;
    let status = ctx.catalog.get_status(release).unwrap_or_default();

    println!("{}", entry.game_name);
    println!("  Release:      {}", entry.release_name);
    println!("  Package:      {}", entry.package_name);
    println!("  Version code: {}", entry.version_code);
    println!("  Updated:      {}", entry.last_updated);
    println!("  Size:         {} MB", entry.size_mb);
    println!("  Downloads:    {}", entry.downloads);
    println!("  Rating:       {} ({} ratings)", entry.rating, entry.rating_count);
    println!("  Status:       {}", if status == EntryStatus::NoInfo { "-".to_string() } else { status.to_string() });
    if let Some(thumbnail) = ctx.catalog.thumbnail(release) {
        println!("  Thumbnail:    {}", thumbnail.display());
    }
    if status.is_at_least(EntryStatus::Downloaded) {
        for file in ctx.catalog.release_files(release)? {
            println!("  File:         {}", file.display());
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// Wait until every release satisfies `done`, logging status changes
async fn wait_for(
    catalog: &Catalog,
    rx: &mut Receiver<CatalogEvent>,
    releases: &[String],
    done: impl Fn(EntryStatus) -> bool,
) {
    loop {
        let finished = releases
            .iter()
            .all(|r| catalog.get_status(r).map(&done).unwrap_or(true));
        if finished {
            return;
        }

        match rx.recv().await {
            Ok(CatalogEvent::StatusChanged(change)) => {
                if change.status.progress().is_some() {
                    debug!(release = %change.entry.release_name, status = %change.status, "Status changed");
                } else {
                    info!(release = %change.entry.release_name, status = %change.status, "Status changed");
                }
            }
            Ok(CatalogEvent::Refreshed { .. }) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return,
        }
    }
}

fn download_finished(status: EntryStatus) -> bool {
    matches!(
        status,
        EntryStatus::Downloaded
            | EntryStatus::Installed
            | EntryStatus::DownloadError
            | EntryStatus::ExtractingError
    )
}

fn install_finished(status: EntryStatus) -> bool {
    matches!(status, EntryStatus::Installed | EntryStatus::InstallingError)
}

pub async fn get(
    config: &Config,
    releases: &[String],
    device: Option<&str>,
    force_metadata: bool,
) -> Result<()> {
    let ctx = AppContext::new(config).await?;
    ctx.refresh(force_metadata).await?;

    for release in releases {
        if !ctx.catalog.contains(release) {
            bail!("Unknown release: {}", release);
        }
    }

    let target = match device {
        Some(id) => {
            let device = find_device(&ctx.registry, id).await?;
            ctx.queue.select_device(Some(device.clone())).await?;
            Some(device)
        }
        None => None,
    };

    let mut rx = ctx.catalog.subscribe();
    for release in releases {
        let status = ctx.catalog.get_status(release).unwrap_or_default();
        if status.is_at_least(EntryStatus::Downloaded) && !status.is_error() {
            info!(release = %release, status = %status, "Already downloaded");
            continue;
        }
        ctx.queue.enqueue_download(release)?;
    }
    ctx.queue.start();

    let work = async {
        wait_for(&ctx.catalog, &mut rx, releases, download_finished).await;

        if let Some(device) = &target {
            let ready: Vec<String> = releases
                .iter()
                .filter(|r| {
                    matches!(
                        ctx.catalog.get_status(r),
                        Some(EntryStatus::Downloaded | EntryStatus::Installed)
                    )
                })
                .cloned()
                .collect();
            for release in &ready {
                ctx.queue.enqueue_install(release, device)?;
            }
            wait_for(&ctx.catalog, &mut rx, &ready, install_finished).await;
        }
        Ok::<(), anyhow::Error>(())
    };

    let outcome = tokio::select! {
        result = work => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    ctx.shutdown().await;

    match outcome {
        Some(result) => result?,
        None => bail!("Interrupted"),
    }

    let failed: Vec<String> = releases
        .iter()
        .filter_map(|r| {
            let status = ctx.catalog.get_status(r)?;
            status.is_error().then(|| format!("{} ({})", r, status))
        })
        .collect();
    for release in releases {
        let status = ctx.catalog.get_status(release).unwrap_or_default();
        println!("{}: {}", release, status);
    }
    if !failed.is_empty() {
        bail!("{} release(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

pub async fn install_file(
    config: &Config,
    file: &Path,
    device: &str,
    obb_package: Option<&str>,
) -> Result<()> {
    if !file.exists() {
        bail!("{} does not exist", file.display());
    }
    let is_obb = file
        .extension()
        .map(|e| e.eq_ignore_ascii_case("obb"))
        .unwrap_or(false);
    if is_obb && obb_package.is_none() {
        bail!("--obb-package is required for .obb files: it names the directory under /sdcard/Android/obb/");
    }

    let (bridge, registry) = build_registry(config)?;
    let device = find_device(&registry, device).await?;
    if !device.is_ready() {
        bail!("Device {} is not ready ({})", device.id, device.status);
    }

    info!(file = %file.display(), device = %device.id, "Installing file");
    let package = obb_package.unwrap_or_default().to_string();
    let files = vec![file.to_path_buf()];
    let id = device.id.clone();
    tokio::task::spawn_blocking(move || bridge.install_files(&package, &files, &id))
        .await?
        .with_context(|| format!("Failed to install {}", file.display()))?;

    println!("Installed {} on {}", file.display(), device.id);
    Ok(())
}

pub async fn delete(config: &Config, releases: &[String], all: bool) -> Result<()> {
    let ctx = AppContext::new(config).await?;
    ctx.refresh(false).await?;

    if all {
        let deleted = ctx.catalog.delete_all_downloaded()?;
        println!("Deleted {} releases", deleted);
    } else {
        for release in releases {
            if ctx.catalog.delete(release)? {
                println!("Deleted {}", release);
            } else {
                println!("{} was not downloaded", release);
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// Select the first ready device when nothing is selected
async fn auto_select(ctx: &AppContext, devices: &[Device]) {
    if ctx.queue.selected_device().is_some() {
        return;
    }
    let Some(device) = devices.iter().find(|d| d.is_ready()) else {
        return;
    };
    match ctx.queue.select_device(Some(device.clone())).await {
        Ok(installed) => info!(device = %device.id, installed, "Selected device"),
        Err(e) => warn!(device = %device.id, error = %e, "Failed to select device"),
    }
}

pub async fn run(config: &Config) -> Result<()> {
    let ctx: Arc<AppContext> = AppContext::new(config).await?;
    let count = ctx.refresh(false).await?;
    info!(count, "Catalog ready");

    let mut status_rx = ctx.catalog.subscribe();
    let mut device_rx = ctx.registry.subscribe();
    ctx.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupt received");
                break;
            }
            event = status_rx.recv() => match event {
                Ok(CatalogEvent::StatusChanged(change)) => {
                    info!(
                        release = %change.entry.release_name,
                        status = %change.status,
                        progress = change.progress_or_neg1(),
                        "Status changed"
                    );
                }
                Ok(CatalogEvent::Refreshed { count }) => info!(count, "Catalog refreshed"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Status events dropped"),
                Err(RecvError::Closed) => break,
            },
            event = device_rx.recv() => match event {
                Ok(DeviceEvent::ListChanged(devices)) => {
                    for device in &devices {
                        info!(device = %device.id, model = %device.model, status = %device.status, "Device");
                    }
                    auto_select(&ctx, &devices).await;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Device events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    ctx.shutdown().await;
    Ok(())
}
