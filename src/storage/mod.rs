mod favourites;
mod history;
mod preferences;
mod revision;
mod schema;
mod types;

pub use schema::Database;
pub use types::DatabaseError;
