mod error;
mod insert;
mod models;
mod open;
mod query;
mod schema;

pub use error::StoreError;
pub use models::*;
pub use open::Db;
pub use schema::CREATE_X_WORLD;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
