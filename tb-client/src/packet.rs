//! Packets and completions.
//!
//! A [`Packet`] owns one pool slot from acquire until it is submitted or
//! released. Submitting turns it into a [`Completion`], a future that owns
//! the slot until the reply has been decoded. Dropping either one returns
//! the slot to the pool, so every exit path releases exactly once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{ClientError, ProtocolError, Result};
use crate::internal::pool::{PacketId, PacketPool, PacketState};
use crate::protocol::{
    decode_accounts, decode_results, decode_transfer_results, decode_transfers, Account,
    AccountResult, Message, Operation, PacketStatus, Transfer, TransferResult,
};

/// A batch bound to a pool slot, ready to be submitted.
///
/// Obtained from [`Client::acquire_packet`](crate::Client::acquire_packet).
pub struct Packet<C> {
    id: PacketId,
    correlation: u64,
    operation: Operation,
    count: u32,
    parts: Option<(Message, C)>,
    pool: Arc<PacketPool>,
}

impl<C> Packet<C> {
    pub(crate) fn new(
        id: PacketId,
        operation: Operation,
        count: u32,
        message: Message,
        context: C,
        pool: Arc<PacketPool>,
    ) -> Self {
        Self {
            id,
            correlation: message.correlation(),
            operation,
            count,
            parts: Some((message, context)),
            pool,
        }
    }

    /// Pool slot identifier.
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// Correlation id the reply will carry.
    pub fn correlation(&self) -> u64 {
        self.correlation
    }

    /// Operation this packet performs.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Number of records in the batch.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Caller context returned on completion.
    pub fn context(&self) -> Option<&C> {
        self.parts.as_ref().map(|(_, context)| context)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PacketState {
        self.pool.state(self.id)
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PacketPool>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Move to `Sent` and hand out the message and context.
    ///
    /// On failure the packet is dropped and its slot released.
    pub(crate) fn into_sent(mut self) -> Result<(PacketId, Message, C)> {
        self.pool.mark_sent(self.id)?;
        match self.parts.take() {
            Some((message, context)) => Ok((self.id, message, context)),
            None => Err(ClientError::InvalidPacketState {
                packet: self.id,
                state: PacketState::Sent,
            }),
        }
    }

    /// Return the slot to the pool without sending.
    pub(crate) fn release(mut self) -> Result<()> {
        self.parts = None;
        self.pool.release(self.id)
    }
}

impl<C> Drop for Packet<C> {
    fn drop(&mut self) {
        if self.parts.take().is_some() {
            let _ = self.pool.release(self.id);
        }
    }
}

impl<C> fmt::Debug for Packet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("correlation", &self.correlation)
            .field("operation", &self.operation)
            .field("count", &self.count)
            .finish()
    }
}

/// What a completed request hands back to its [`Completion`].
pub(crate) struct Delivery<C> {
    pub context: C,
    pub outcome: Result<Message>,
}

/// Decodes a reply for a batch of `count` records at the negotiated version.
pub(crate) type Decoder<R> = fn(&Message, u32, u16) -> Result<R>;

/// Outcome of a completed packet.
#[derive(Clone, Debug)]
pub struct CompletionEvent<C, R> {
    /// The slot the request used. Already released.
    pub packet: PacketId,
    /// Correlation id of the request.
    pub correlation: u64,
    /// Caller context supplied at submission.
    pub context: C,
    /// Decoded results.
    pub results: R,
}

/// Pending result of a submitted packet.
///
/// Resolves once the reply has arrived and been decoded, or the request has
/// failed. The slot is released before the event is returned. Dropping an
/// unresolved completion releases the slot as soon as the request finishes.
#[must_use = "completions release their packet only when awaited or dropped"]
pub struct Completion<C, R> {
    packet: PacketId,
    correlation: u64,
    count: u32,
    version: u16,
    receiver: oneshot::Receiver<Delivery<C>>,
    decode: Decoder<R>,
    pool: Arc<PacketPool>,
    finished: bool,
}

impl<C, R> Completion<C, R> {
    pub(crate) fn new(
        packet: PacketId,
        correlation: u64,
        count: u32,
        version: u16,
        receiver: oneshot::Receiver<Delivery<C>>,
        decode: Decoder<R>,
        pool: Arc<PacketPool>,
    ) -> Self {
        Self {
            packet,
            correlation,
            count,
            version,
            receiver,
            decode,
            pool,
            finished: false,
        }
    }

    /// Pool slot used by the request.
    pub fn packet(&self) -> PacketId {
        self.packet
    }

    /// Correlation id of the request.
    pub fn correlation(&self) -> u64 {
        self.correlation
    }

    /// Block the current thread until the completion resolves.
    #[cfg(feature = "sync")]
    pub fn wait(self) -> Result<CompletionEvent<C, R>> {
        futures::executor::block_on(self)
    }
}

impl<C, R> Future for Completion<C, R> {
    type Output = Result<CompletionEvent<C, R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Err(ClientError::InvalidPacketState {
                packet: this.packet,
                state: PacketState::Released,
            }));
        }

        let delivery = match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(delivery)) => delivery,
            // The session went away without answering. The slot may still
            // be `Sent`, so complete it before releasing.
            Poll::Ready(Err(_)) => {
                this.finished = true;
                let _ = this.pool.complete(this.packet);
                let _ = this.pool.release(this.packet);
                return Poll::Ready(Err(ClientError::Shutdown));
            }
        };
        this.finished = true;

        let results = delivery
            .outcome
            .and_then(|reply| (this.decode)(&reply, this.count, this.version));
        this.pool.release(this.packet)?;

        Poll::Ready(results.map(|results| CompletionEvent {
            packet: this.packet,
            correlation: this.correlation,
            context: delivery.context,
            results,
        }))
    }
}

impl<C, R> Drop for Completion<C, R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Either the delivery is already queued and the slot is ours to
        // release, or the completer's send will fail and it releases instead.
        self.receiver.close();
        if self.receiver.try_recv().is_ok() {
            let _ = self.pool.release(self.packet);
        }
    }
}

impl<C, R> fmt::Debug for Completion<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("packet", &self.packet)
            .field("correlation", &self.correlation)
            .field("count", &self.count)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Status and version checks shared by every reply.
fn check_reply(reply: &Message, operation: Operation, version: u16) -> Result<()> {
    let header = reply.header();
    let found = header.version.get();
    if found != version {
        return Err(ProtocolError::UnsupportedVersion {
            expected: version,
            found,
        }
        .into());
    }
    match header.operation() {
        Some(found) if found == operation => {}
        Some(_) => return Err(ProtocolError::UnexpectedReply.into()),
        None => return Err(ProtocolError::InvalidOperation.into()),
    }
    match header.status() {
        Some(PacketStatus::Ok) => Ok(()),
        Some(status) => Err(ClientError::Rejected(status)),
        None => Err(ProtocolError::InvalidHeader.into()),
    }
}

/// Create-accounts reply: one result per submitted record, in batch order.
pub(crate) fn decode_create_reply(
    reply: &Message,
    count: u32,
    version: u16,
) -> Result<Vec<AccountResult>> {
    check_reply(reply, Operation::CreateAccounts, version)?;
    Ok(decode_results(reply.body(), count as usize)?)
}

/// Lookup reply: the accounts that were found.
pub(crate) fn decode_lookup_reply(
    reply: &Message,
    count: u32,
    version: u16,
) -> Result<Vec<Account>> {
    check_reply(reply, Operation::LookupAccounts, version)?;
    let accounts = decode_accounts(reply.body())?;
    if accounts.len() > count as usize {
        return Err(ProtocolError::ResultMismatch.into());
    }
    Ok(accounts)
}

/// Create-transfers reply: one result per submitted record, in batch order.
pub(crate) fn decode_create_transfers_reply(
    reply: &Message,
    count: u32,
    version: u16,
) -> Result<Vec<TransferResult>> {
    check_reply(reply, Operation::CreateTransfers, version)?;
    Ok(decode_transfer_results(reply.body(), count as usize)?)
}

/// Transfer lookup reply: the transfers that were found.
pub(crate) fn decode_lookup_transfers_reply(
    reply: &Message,
    count: u32,
    version: u16,
) -> Result<Vec<Transfer>> {
    check_reply(reply, Operation::LookupTransfers, version)?;
    let transfers = decode_transfers(reply.body())?;
    if transfers.len() > count as usize {
        return Err(ProtocolError::ResultMismatch.into());
    }
    Ok(transfers)
}
