pub mod job;
pub mod room;

pub use job::{ErrorLogEntry, Job, JobKind, JobPatch, JobStatus, Segment};
pub use room::{Room, RoomStatus, RoomStatusCounts, RoomTranscript};
