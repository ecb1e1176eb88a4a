//! Inbound Ports (Driving Ports)
//!
//! The API producers, consumers and the broker runtime use to drive paging.

use async_trait::async_trait;
use shared_types::{Address, Message, MessageId, QueueName};

use crate::domain::errors::PagingResult;
use crate::domain::metrics::{PagingMetrics, ReclaimReport};
use crate::domain::session::SendContext;
use crate::service::store::AdmitOutcome;
use crate::service::subscription::QueueSubscription;

/// Primary paging API (Driving Port)
///
/// # Example
///
/// ```rust,ignore
/// use mq_01_paging::{PagingApi, SendContext};
///
/// async fn example(paging: &impl PagingApi) -> PagingResult<()> {
///     let sub = paging.bind_queue(address.clone(), queue)?;
///     paging.send(message, &SendContext::detached()).await?;
///     while let Some(delivery) = sub.next_deliverable()? {
///         sub.acknowledge(delivery.id)?;
///     }
///     paging.reclaim()?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait PagingApi: Send + Sync {
    /// Route a message to its address under the address's full policy.
    ///
    /// # Errors
    /// - `DestinationFull`: FAIL policy and the address is over its limit
    /// - `SendTimeout`: BLOCK policy and no space freed within the timeout
    /// - `Closed`: the session closed while the send was suspended
    /// - `StoreFailed`: the address's store was fenced by an earlier I/O error
    async fn send(&self, message: Message, ctx: &SendContext) -> PagingResult<AdmitOutcome>;

    /// Bind a queue to an address; it receives messages sent from now on.
    fn bind_queue(&self, address: Address, queue: QueueName) -> PagingResult<QueueSubscription>;

    /// Remove a queue binding and release what it held.
    fn unbind_queue(&self, address: &Address, queue: &QueueName) -> PagingResult<bool>;

    /// Allocate a message id unique across restarts.
    fn next_message_id(&self) -> MessageId;

    /// One reclamation pass over every address.
    fn reclaim(&self) -> PagingResult<ReclaimReport>;

    fn metrics(&self) -> PagingMetrics;
}
