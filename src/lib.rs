//! poststash
//!
//! Retrieves social posts matching configured search terms and archives
//! each one as a JSON file on disk, deduplicated by post id. Two modes:
//! a bounded historical search that paginates backward in time, and a
//! live streaming subscription that runs until cancelled.

pub mod config;
pub mod listen;
pub mod models;
pub mod provider;
pub mod search;
pub mod stash;
