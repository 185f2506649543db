//! Database access for bgref-cr
//!
//! Free functions over a shared `SqlitePool`. Schema creation lives in
//! `bgref_common::db`.

pub mod entities;
pub mod relations;
pub mod runs;
pub mod settings;
