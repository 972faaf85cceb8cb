pub mod error;
pub mod indexes;
pub mod models;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use models::{
    ErrorLogEntry, Job, JobKind, JobPatch, JobStatus, Room, RoomStatus, RoomStatusCounts,
    RoomTranscript, Segment,
};
pub use store::{JobStore, MongoJobStore};
