//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for database operations
//!
//! All decimal values (amounts, rates, volumes) are stored as canonical
//! strings and summed in Rust, never with SQL aggregates, to keep the
//! arithmetic lossless.

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
