//! Postwatch Storage - Database access for the report pipeline
//!
//! This crate provides the PostgreSQL pool, row models, and repositories
//! used by the ingestion pipeline and the analysis engine.

pub mod db;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use models::*;
pub use repository::*;
