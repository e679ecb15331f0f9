//! `PostgreSQL` storage for the rental reconciliation services.
//!
//! This crate implements [`RentalStore`](rental_runtime::store::RentalStore)
//! over sqlx. A unit of work is one database transaction; its first statement
//! locks the equipment row with `SELECT ... FOR UPDATE`, which serializes every
//! availability check, booking insert and payment settlement on that item.
//!
//! - Unique constraints back the domain rules: one payment per gateway
//!   reference, one participant row per user and group
//! - Money is stored as `BIGINT` minor units, statuses as stable text labels
//! - Migrations are embedded with `sqlx::migrate!`
//!
//! # Example
//!
//! ```ignore
//! use rental_postgres::PgRentalStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgRentalStore::connect("postgres://localhost/rentals", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;

pub use store::{PgRentalStore, PgUnitOfWork};
