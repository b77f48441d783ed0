//! Backend implementations for the render module
//!
//! Vulkan is the only GPU backend. The headless device stands in for it in
//! tests and tools and keeps an exact ledger of every object it hands out.

/// In-memory device with create/destroy accounting
pub mod headless;

/// Vulkan rendering backend implementation
pub mod vulkan;
