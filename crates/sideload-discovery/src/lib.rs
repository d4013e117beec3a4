//! Sideload Discovery - Attached device tracking
//!
//! Polls the Android device bridge on a fixed interval and publishes the
//! device list whenever it changes.

pub mod registry;

pub use registry::{DeviceEvent, DeviceRegistry, RegistryConfig, MODEL_PROPERTY};
