//! Database schema and initialization

pub mod init;

pub use init::{connect_in_memory, create_tables, init_database};
