pub mod bus;
pub mod cache;
pub mod llm;
pub mod manager;
pub mod rooms;
pub mod tasks;

pub use bus::{EventBus, RedisEventBus};
pub use cache::{JobCache, RedisJobCache};
pub use llm::{LlmError, OllamaSummarizer, Summarizer};
pub use manager::JobManager;
pub use tasks::{TASK_BATCH_PIPELINE, TASK_ROOM_SUMMARY, TaskQueue};
