//! Durable FIFO task queues.
//!
//! Two named queues, `general` and `caption`, carry job references;
//! full job state lives in the state store. Workers pop a task, process it
//! to completion, and ack; a worker that crashes without acking has its
//! task re-delivered after a visibility timeout, which is safe because the
//! stage runner is idempotent over completed stages.
//!
//! The transport is swappable behind [`TaskQueue`]: Redis Streams in
//! production, an in-memory queue in tests.

mod error;
mod memory;
mod queue;
mod task;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryTaskQueue;
pub use queue::{JobQueues, QueueConfig, RedisTaskQueue, TaskQueue};
pub use task::{CaptioningTask, PipelineTask, QueueName, QueueTask, UploadOnlyTask};
