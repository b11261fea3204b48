//! Core types shared by the larder caching proxy.
//!
//! This crate defines the pieces every other crate agrees on:
//! - The request-path to cache-key codec
//! - Configuration for the server, origin, storage and admin surfaces
//! - The core error type

pub mod config;
pub mod error;
pub mod key;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use key::CacheKey;
