//! A bounded queue handing accepted evaluations over to the task runner.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::common::EvaluationId;

/// Creates a queue holding at most `capacity` evaluations that wait for a worker.
pub fn task_queue(capacity: usize) -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (TaskSender(tx), TaskReceiver(rx))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("the task queue is full")]
    Full,
    #[error("the task queue is closed")]
    Closed,
}

#[derive(Clone, Debug)]
/// The sending half of the task queue.
pub struct TaskSender(mpsc::Sender<EvaluationId>);

impl TaskSender {
    /// Enqueues an evaluation without waiting for a free slot.
    pub fn enqueue(&self, id: EvaluationId) -> Result<(), QueueError> {
        self.0.try_send(id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Enqueues an evaluation, waiting for a free slot if the queue is full.
    pub async fn enqueue_wait(&self, id: EvaluationId) -> Result<(), QueueError> {
        self.0.send(id).await.map_err(|_| QueueError::Closed)
    }
}

#[derive(Debug)]
/// The receiving half of the task queue.
pub struct TaskReceiver(mpsc::Receiver<EvaluationId>);

impl TaskReceiver {
    /// Waits for the next evaluation. Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<EvaluationId> {
        self.0.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_is_bounded_and_ordered() {
        let (tx, mut rx) = task_queue(2);
        let (a, b) = (EvaluationId::new(), EvaluationId::new());
        tx.enqueue(a).unwrap();
        tx.enqueue(b).unwrap();
        assert_eq!(tx.enqueue(EvaluationId::new()), Err(QueueError::Full));

        assert_eq!(rx.next().await, Some(a));
        assert_eq!(rx.next().await, Some(b));
        drop(tx);
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx) = task_queue(1);
        drop(rx);
        assert_eq!(tx.enqueue(EvaluationId::new()), Err(QueueError::Closed));
        assert_eq!(
            tx.enqueue_wait(EvaluationId::new()).await,
            Err(QueueError::Closed)
        );
    }
}
