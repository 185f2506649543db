//! Test Helper Utilities
//!
//! Shared utilities for testing bgref-cr

#![allow(dead_code)]

pub mod catalog_server;
pub mod db_utils;
pub mod fake_catalog;

// Re-export commonly used items
pub use catalog_server::{expansion_link, item, spawn_catalog_server, CatalogServer};
pub use db_utils::{count_rows, create_test_db, run_and_collect, terminal_events};
pub use fake_catalog::{base_game, expansion_of, id, link, FakeCatalog};
