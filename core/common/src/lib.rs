//! Common utilities and types shared across the salecache crates.
//!
//! This module provides the error taxonomy and the small identifier types
//! every layer of the cache agrees on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{CollectionName, SensitiveBytes, StoreKey};
