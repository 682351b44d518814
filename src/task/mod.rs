//! Evaluation tasks: their lifecycle, their queue and their execution.

pub mod queue;
pub mod runner;
pub mod state;

pub use self::{
    queue::{task_queue, QueueError, TaskReceiver, TaskSender},
    runner::TaskRunner,
    state::{FailureReason, StateKind, TaskRecord, TaskState},
};
