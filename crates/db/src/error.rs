use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed failures for the durable job store.
///
/// Every store operation is a self-contained database call; errors never
/// leave a partial write behind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("failed to create job {job_id}: {reason}")]
    JobCreation { job_id: String, reason: String },

    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error(transparent)]
    BsonSer(#[from] bson::ser::Error),

    #[error(transparent)]
    BsonDe(#[from] bson::de::Error),
}
