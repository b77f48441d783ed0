//! # Core Module
//!
//! Shared configuration used by the pools, the material system and the
//! render target.

pub mod config;

pub use config::{
    Config, ConfigError, MaterialConfig, PoolConfig, RenderCoreConfig, SwapchainConfig,
};
