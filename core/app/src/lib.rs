//! Sales cache for SaleCache.
//!
//! This module provides:
//! - Typed sale, buyer and producer entities
//! - Read facades with the queries the application screens need
//! - Session handling with key derivation, hydration and key rotation
//!
//! # Architecture
//! The cache manager sits between the user interface and the sync engine.
//! Screens read published snapshots through the facades; every change
//! arrives through a sync.

pub mod entities;
pub mod facades;
pub mod manager;
pub mod session;

pub use entities::{Buyer, Entity, Party, PartyStatus, Producer, Sale, SaleStatus};
pub use facades::{BuyersCache, CollectionCache, ProducersCache, SalesCache};
pub use manager::{CacheManager, CollectionStatus};
pub use session::{SessionHandle, SessionReport};
