mod db;
mod db_object;
mod env;

pub use db::{get_db, ensure_unique_index};
pub use db_object::{MongoDbObject, is_duplicate_key_error};
pub use env::MongoDbEnv;

pub use mongodb::bson::{self, doc, Bson, Document};
pub use mongodb::error::Error as MongoDbError;
pub use mongodb::Database;
