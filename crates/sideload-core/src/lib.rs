//! Sideload Core - Core types, catalog status store, and collaborator contracts
//!
//! This crate provides the foundational types for the Sideload system:
//! - Device snapshots as reported by the Android bridge
//! - Catalog entries and their lifecycle status
//! - The catalog itself, the single owner of per-entry status
//! - On-disk layout of cache and download directories
//! - Traits for the external download, archive, and bridge tools

pub mod catalog;
pub mod collaborator;
pub mod device;
pub mod entry;
pub mod gamelist;
pub mod layout;

pub use catalog::{Catalog, CatalogError, CatalogEvent, StatusChange};
pub use collaborator::{ArchiveTool, CatalogSource, DeviceBridge, DownloadTool, ToolError};
pub use device::{Device, DeviceId, DeviceStatus};
pub use entry::{CatalogEntry, EntryStatus};
pub use gamelist::{load_game_list, parse_game_list, GameListError};
pub use layout::{remote_id, StorageLayout};
