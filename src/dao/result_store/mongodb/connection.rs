//! Client construction for the durable result store: connection settings, the startup ping
//! loop and the indexes the record collections rely on.

use std::time::Duration;

use mongodb::{
    Client, Database, IndexModel,
    bson::{Document, doc},
    options::{ClientOptions, IndexOptions},
};
use tokio::time::sleep;
use tracing::{info, warn};

use super::{
    error::{MongoDaoError, MongoResult},
    store::{PARTICIPANT_COLLECTION_NAME, SESSION_COLLECTION_NAME},
};

const DEFAULT_DB: &str = "live_quiz";
const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_FIRST_RETRY: Duration = Duration::from_millis(250);
const DEFAULT_MAX_RETRY: Duration = Duration::from_secs(5);

/// Connection settings of the result store.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options parsed from the connection URI.
    pub options: ClientOptions,
    /// Database holding the record collections.
    pub database_name: String,
    /// Pings tried before a connection is reported as failed.
    pub connect_attempts: u32,
    /// Wait after the first failed ping, doubled after each further failure.
    pub first_retry: Duration,
    /// Ceiling of the wait between pings.
    pub max_retry: Duration,
}

impl MongoConfig {
    /// Parse `uri`. The database defaults to `live_quiz`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DB).to_owned(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            first_retry: DEFAULT_FIRST_RETRY,
            max_retry: DEFAULT_MAX_RETRY,
        })
    }

    /// Waits between consecutive pings, one per failed attempt except the last.
    fn retry_delays(&self) -> impl Iterator<Item = Duration> {
        let max_retry = self.max_retry;
        std::iter::successors(Some(self.first_retry.min(max_retry)), move |delay| {
            Some((*delay * 2).min(max_retry))
        })
        .take(self.connect_attempts.saturating_sub(1) as usize)
    }
}

/// Build a client and wait until the server answers a ping.
pub(super) async fn open_database(config: &MongoConfig) -> MongoResult<Database> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut delays = config.retry_delays();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let err = match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => break,
            Err(err) => err,
        };
        let Some(delay) = delays.next() else {
            return Err(MongoDaoError::InitialPing {
                attempts,
                source: err,
            });
        };
        warn!(
            attempts,
            wait_ms = delay.as_millis(),
            error = %err,
            "result store did not answer the connection ping; retrying"
        );
        sleep(delay).await;
    }

    info!(database = %config.database_name, attempts, "result store connected");
    Ok(database)
}

/// One index of the record collections.
struct IndexSpec {
    collection: &'static str,
    name: &'static str,
    fields: &'static [&'static str],
    unique: bool,
}

/// One session row per access code and one participant row per (session, user) pair; history
/// lookups go through the user and cookie indexes.
const INDEXES: &[IndexSpec] = &[
    IndexSpec {
        collection: SESSION_COLLECTION_NAME,
        name: "session_access_code_idx",
        fields: &["access_code"],
        unique: true,
    },
    IndexSpec {
        collection: PARTICIPANT_COLLECTION_NAME,
        name: "participant_session_user_idx",
        fields: &["access_code", "user_id"],
        unique: true,
    },
    IndexSpec {
        collection: PARTICIPANT_COLLECTION_NAME,
        name: "participant_user_idx",
        fields: &["user_id"],
        unique: false,
    },
    IndexSpec {
        collection: PARTICIPANT_COLLECTION_NAME,
        name: "participant_cookie_idx",
        fields: &["cookie_id"],
        unique: false,
    },
];

impl IndexSpec {
    fn model(&self) -> IndexModel {
        let keys: Document = self
            .fields
            .iter()
            .map(|field| (field.to_string(), 1.into()))
            .collect();
        IndexModel::builder()
            .keys(keys)
            .options(
                IndexOptions::builder()
                    .name(Some(self.name.to_owned()))
                    .unique(self.unique.then_some(true))
                    .build(),
            )
            .build()
    }
}

/// Create the record indexes. Existing indexes with the same definition are left alone.
pub(super) async fn ensure_indexes(database: &Database) -> MongoResult<()> {
    for spec in INDEXES {
        database
            .collection::<Document>(spec.collection)
            .create_index(spec.model())
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: spec.collection,
                index: spec.name,
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(attempts: u32) -> MongoConfig {
        MongoConfig {
            options: ClientOptions::default(),
            database_name: DEFAULT_DB.to_owned(),
            connect_attempts: attempts,
            first_retry: Duration::from_millis(250),
            max_retry: Duration::from_secs(1),
        }
    }

    #[test]
    fn retry_delays_double_up_to_the_ceiling() {
        let delays: Vec<u64> = config(6)
            .retry_delays()
            .map(|delay| delay.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
    }

    #[test]
    fn a_single_attempt_never_waits() {
        assert_eq!(config(1).retry_delays().count(), 0);
        assert_eq!(config(0).retry_delays().count(), 0);
    }

    #[test]
    fn record_uniqueness_is_enforced_by_indexes() {
        let unique: Vec<(&str, &[&str])> = INDEXES
            .iter()
            .filter(|spec| spec.unique)
            .map(|spec| (spec.collection, spec.fields))
            .collect();
        assert_eq!(
            unique,
            vec![
                (SESSION_COLLECTION_NAME, &["access_code"][..]),
                (PARTICIPANT_COLLECTION_NAME, &["access_code", "user_id"][..]),
            ]
        );

        let model = INDEXES[1].model();
        assert_eq!(model.keys, doc! { "access_code": 1, "user_id": 1 });
    }
}
