pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod store;

pub use sqlx;

pub use db::{DbConfig, init_db};
pub use error::StoreError;
pub use store::{DomainStore, OwnershipTx, PgStore, SummaryStore};
