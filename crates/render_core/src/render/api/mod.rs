//! Device-facing API
//!
//! Opaque handles, plain create-info structs and the [`GraphicsDevice`] trait
//! every backend implements.

pub mod graphics_device;
pub mod types;

pub use graphics_device::{create_headless_device, BackendKind, DeviceRef, GraphicsDevice};
pub use types::*;
