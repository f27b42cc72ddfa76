//! MongoDB implementation of the durable result store.

mod connection;
mod error;
mod models;
mod store;

pub use connection::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoResultStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        if err.is_duplicate_key() {
            return StorageError::integrity(err.to_string());
        }
        StorageError::unavailable(err.to_string(), err)
    }
}
