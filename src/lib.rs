//! Snowball - community link-graph crawler.
//!
//! Starting from seed communities, repeatedly fetches metadata, extracts
//! edges to other communities (hyperlinks, textual references, shared
//! moderators) and enqueues the targets until nothing new is reachable.
//! All crawl state is persisted in SQLite so runs resume where they stopped.

pub mod cli;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod schema;
pub mod snowball;
