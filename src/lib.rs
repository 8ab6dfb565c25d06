//! Response caching and prefix search in front of a car catalog API.

pub mod application;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod infra;
pub mod search;
pub mod store;
pub(crate) mod util;
