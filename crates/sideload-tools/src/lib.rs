//! Sideload Tools - Bindings for the external programs Sideload drives
//!
//! - `adb` for device listing, properties, and installs
//! - `rclone` for mirror downloads with progress
//! - `7zz` for archive extraction
//!
//! Every wrapper implements one of the collaborator traits from
//! `sideload-core` and is blocking.

pub mod adb;
pub mod process;
pub mod rclone;
pub mod sevenzip;

pub use adb::AdbBridge;
pub use process::resolve_tool;
pub use rclone::{ProgressParser, Rclone};
pub use sevenzip::SevenZip;
