use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to write session `{pin}`")]
    WriteSession {
        pin: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session `{pin}`")]
    LoadSession {
        pin: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write player `{name}` of session `{pin}`")]
    WritePlayer {
        pin: String,
        name: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load players of session `{pin}`")]
    LoadPlayers {
        pin: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to record score entry for session `{pin}`")]
    RecordScore {
        pin: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load score entries of session `{pin}`")]
    LoadScores {
        pin: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write results record for session `{pin}`")]
    WriteResults {
        pin: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load results record for session `{pin}`")]
    LoadResults {
        pin: String,
        #[source]
        source: MongoError,
    },
}
