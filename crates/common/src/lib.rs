//! Common utilities for weft
//!
//! Shared code used across all weft crates.

pub mod error;

pub use error::{Error, Result};
