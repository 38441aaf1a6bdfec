pub mod calls;
pub mod database;
pub mod migrations;
pub mod models;
pub mod participants;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
