//! Message queue over the service database
//!
//! Messages live in `mq_messages`; each consumer group keeps a claim cursor in
//! `mq_group_offsets` and holds a lease in `mq_inflight` for every batch it is
//! working on. A batch is committed by releasing its lease. Leases that expire
//! (a worker died mid-batch) are handed out again, so delivery is
//! at-least-once and handlers must be idempotent.
//!
//! Because the queue shares the database with task records, a message can be
//! enqueued in the same transaction as the row it refers to
//! ([`MessageQueue::produce_in`]).

use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

mod consumer;
mod producer;

pub use consumer::{Consumer, ConsumerBuilder, ConsumerHandle};
pub use producer::MessageQueue;

/// Processes messages of one queue
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message
    ///
    /// `cancel` fires when the consumer is aborted. Errors are logged by the
    /// consumer and the message is not redelivered.
    async fn handle(&self, payload: &[u8], cancel: &CancellationToken) -> Result<()>;
}
