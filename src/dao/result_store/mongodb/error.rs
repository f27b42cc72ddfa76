use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

/// Result of MongoDB backend calls.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Server error code reported when a unique index rejects a write.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures of the MongoDB backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection URI did not parse.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The driver refused the options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Pings tried.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// A health check ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Indexed collection.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The session row was not inserted.
    #[error("failed to record session `{code}`")]
    RecordSession {
        /// Session access code.
        code: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A participant row was not inserted.
    #[error("failed to record participant `{user_id}` of session `{code}`")]
    RecordParticipant {
        /// Session access code.
        code: String,
        /// Participant.
        user_id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading a session failed.
    #[error("failed to load session `{code}`")]
    LoadSession {
        /// Session access code.
        code: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Deleting a session failed.
    #[error("failed to delete session `{code}`")]
    DeleteSession {
        /// Session access code.
        code: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A history query failed.
    #[error("failed to list session history")]
    ListHistory {
        /// Driver error.
        #[source]
        source: MongoError,
    },
}

impl MongoDaoError {
    fn source_error(&self) -> &MongoError {
        match self {
            MongoDaoError::InvalidUri { source, .. }
            | MongoDaoError::ClientConstruction { source }
            | MongoDaoError::InitialPing { source, .. }
            | MongoDaoError::HealthPing { source }
            | MongoDaoError::EnsureIndex { source, .. }
            | MongoDaoError::RecordSession { source, .. }
            | MongoDaoError::RecordParticipant { source, .. }
            | MongoDaoError::LoadSession { source, .. }
            | MongoDaoError::DeleteSession { source, .. }
            | MongoDaoError::ListHistory { source } => source,
        }
    }

    /// True when a unique index rejected the write.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self.source_error().kind.as_ref(),
            ErrorKind::Write(WriteFailure::WriteError(write_error))
                if write_error.code == DUPLICATE_KEY_CODE
        )
    }
}
