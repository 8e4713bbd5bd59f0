//! Persistence layer for the encrypted sync cache.
//!
//! This module provides a trait-based interface over any key-value medium
//! (local files, memory, ...) and the [`EncryptedStore`] that seals collection
//! payloads before they reach it.
//!
//! # Design Principles
//! - Backends are dumb: they store opaque bytes under a [`StoreKey`]
//! - Writes are atomic from the caller's perspective
//! - The encrypted store knows nothing about sync semantics
//!
//! [`StoreKey`]: salecache_common::StoreKey

pub mod encrypted;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use encrypted::EncryptedStore;
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use provider::BlobStore;
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
