//! `PostgreSQL` persistence for the Virtual Greenhouse.
//!
//! The core reads its catalog and writes plant state through the
//! [`PlantRepository`](greenhouse_core::PlantRepository) and
//! [`AuditLog`](greenhouse_core::AuditLog) traits. This crate implements
//! both over a `sqlx` pool.
//!
//! # Modules
//!
//! - [`postgres`] -- connection pool, configuration and migrations
//! - [`repository`] -- species, plant and audit log queries
//! - [`error`] -- shared error types

pub mod error;
pub mod postgres;
pub mod repository;

// Re-export primary types for convenience.
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use repository::{PgRepository, PlantRow, SpeciesRow};
