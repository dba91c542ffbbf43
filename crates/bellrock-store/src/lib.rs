pub mod database;
pub mod keystore;
pub mod locations;
pub mod migrations;
pub mod models;
pub mod observations;
pub mod peers;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use keystore::KeyStore;
pub use models::*;
