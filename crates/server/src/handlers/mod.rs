//! HTTP request handlers.

pub mod admin;
pub mod cache;
pub mod stat;

pub use admin::*;
pub use cache::*;
pub use stat::*;
