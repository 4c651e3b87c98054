//! Ledger client.
//!
//! This module provides the main [`Client`] type for submitting batches to
//! the ledger service.
//!
//! # Example
//!
//! ```ignore
//! use tb_client::{Account, Client, Config};
//!
//! let client: Client = Client::init("127.0.0.1", 3000, 0, Config::default())?;
//!
//! let account = Account {
//!     id: tb_client::id(),
//!     ledger: 1,
//!     code: 1,
//!     ..Default::default()
//! };
//! let event = client.submit(&[account])?.wait()?;
//! assert!(event.results[0].is_ok());
//!
//! client.deinit();
//! # Ok::<_, tb_client::ClientError>(())
//! ```

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ClientError, InitError, Result, ValidationError};
use crate::internal::pool::{PacketId, PacketPool, PacketState};
use crate::internal::session::{
    Completer, Request, Session, SessionCommand, SessionOptions, SessionState, SharedState,
};
use crate::packet::{
    decode_create_reply, decode_create_transfers_reply, decode_lookup_reply,
    decode_lookup_transfers_reply, Completion, Decoder, Delivery, Packet,
};
use crate::protocol::{
    encode_accounts, encode_ids, encode_transfers, Account, AccountResult, MessageBuilder,
    Operation, Transfer, TransferResult,
};

/// Ledger client handle.
///
/// `C` is the caller's completion context: a value attached to each packet
/// and handed back verbatim when the packet completes.
///
/// # Thread Safety
///
/// The handle is `Send + Sync`. Any number of threads or tasks may submit
/// through a shared reference (for example an `Arc<Client<C>>`). All network
/// I/O runs on a dedicated `tb-client-io` thread.
pub struct Client<C = ()> {
    /// Unique client identifier (random, non-zero).
    id: u128,
    /// Cluster identifier.
    cluster: u128,
    /// Negotiated configuration.
    config: Config,
    pool: Arc<PacketPool>,
    state: SharedState,
    commands: mpsc::UnboundedSender<SessionCommand>,
    next_correlation: AtomicU64,
    last_context: Arc<Mutex<Option<C>>>,
    closed: AtomicBool,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client builder for custom configuration.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client: Client = Client::builder()
    ///     .cluster(0)
    ///     .address("127.0.0.1:3000")?
    ///     .connect_timeout(Duration::from_secs(10))
    ///     .request_timeout(Duration::from_secs(5))
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C: Clone + Send + 'static> Client<C> {
    /// Connect to the server at `address:port`, register and negotiate `config`.
    ///
    /// Blocks until registration completes or fails.
    #[cfg(feature = "sync")]
    pub fn init(address: &str, port: u16, cluster: u128, config: Config) -> Result<Self> {
        let builder = ClientBuilder::new()
            .cluster(cluster)
            .address_port(address, port)?
            .config(config);
        futures::executor::block_on(builder.build())
    }

    /// Get the client ID.
    pub fn id(&self) -> u128 {
        self.id
    }

    /// Get the cluster ID.
    pub fn cluster(&self) -> u128 {
        self.cluster
    }

    /// Negotiated configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current transport state.
    pub fn session_state(&self) -> SessionState {
        self.state.get()
    }

    /// Maximum number of records per batch.
    pub fn max_batch_count(&self) -> u32 {
        self.config.max_batch_count()
    }

    /// Maximum number of transfers per batch.
    pub fn max_transfer_batch_count(&self) -> u32 {
        self.config.max_transfer_batch_count()
    }

    /// Number of packets currently free.
    pub fn packets_available(&self) -> u32 {
        self.pool.available()
    }

    /// Total number of packets.
    pub fn packet_capacity(&self) -> u32 {
        self.pool.capacity()
    }

    /// Lifecycle state of a packet.
    pub fn packet_state(&self, packet: PacketId) -> PacketState {
        self.pool.state(packet)
    }

    /// Submit a batch of accounts with a default context.
    pub fn submit(&self, accounts: &[Account]) -> Result<Completion<C, Vec<AccountResult>>>
    where
        C: Default,
    {
        self.submit_with_context(accounts, C::default())
    }

    /// Submit a batch of accounts.
    ///
    /// Validation happens before any packet is taken, so a rejected batch
    /// never touches the pool or the network. Returns immediately; await the
    /// [`Completion`] (or call `wait`) for the per-record results, which are
    /// in the same order as `accounts`.
    pub fn submit_with_context(
        &self,
        accounts: &[Account],
        context: C,
    ) -> Result<Completion<C, Vec<AccountResult>>> {
        let packet = self.acquire_packet(accounts, context)?;
        self.submit_packet(packet)
    }

    /// Submit a batch and block until it completes.
    #[cfg(feature = "sync")]
    pub fn submit_blocking(&self, accounts: &[Account]) -> Result<Vec<AccountResult>>
    where
        C: Default,
    {
        Ok(self.submit(accounts)?.wait()?.results)
    }

    /// Create accounts, returning one result per account in batch order.
    pub async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<AccountResult>>
    where
        C: Default,
    {
        Ok(self.submit(accounts)?.await?.results)
    }

    /// Lookup accounts by ID. Accounts that do not exist are omitted.
    pub async fn lookup_accounts(&self, ids: &[u128]) -> Result<Vec<Account>>
    where
        C: Default,
    {
        Ok(self.lookup_with_context(ids, C::default())?.await?.results)
    }

    /// Submit an account lookup.
    pub fn lookup_with_context(
        &self,
        ids: &[u128],
        context: C,
    ) -> Result<Completion<C, Vec<Account>>> {
        self.check_open()?;
        check_batch_len(ids.len(), self.max_batch_count())?;
        let packet = self.prepare(Operation::LookupAccounts, ids.len(), encode_ids(ids), context)?;
        self.send(packet, decode_lookup_reply)
    }

    /// Create transfers, returning one result per transfer in batch order.
    pub async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<TransferResult>>
    where
        C: Default,
    {
        Ok(self
            .submit_transfers(transfers, C::default())?
            .await?
            .results)
    }

    /// Submit a batch of transfers.
    ///
    /// Same validation and pool rules as [`Client::submit_with_context`].
    pub fn submit_transfers(
        &self,
        transfers: &[Transfer],
        context: C,
    ) -> Result<Completion<C, Vec<TransferResult>>> {
        self.check_open()?;
        validate_transfers(transfers, &self.config)?;
        let body = encode_transfers(transfers)?;
        let packet = self.prepare(Operation::CreateTransfers, transfers.len(), body, context)?;
        self.send(packet, decode_create_transfers_reply)
    }

    /// Lookup transfers by ID. Transfers that do not exist are omitted.
    pub async fn lookup_transfers(&self, ids: &[u128]) -> Result<Vec<Transfer>>
    where
        C: Default,
    {
        Ok(self
            .lookup_transfers_with_context(ids, C::default())?
            .await?
            .results)
    }

    /// Submit a transfer lookup.
    pub fn lookup_transfers_with_context(
        &self,
        ids: &[u128],
        context: C,
    ) -> Result<Completion<C, Vec<Transfer>>> {
        self.check_open()?;
        check_batch_len(ids.len(), self.max_batch_count())?;
        let packet = self.prepare(Operation::LookupTransfers, ids.len(), encode_ids(ids), context)?;
        self.send(packet, decode_lookup_transfers_reply)
    }

    /// Validate and encode a batch into a fresh packet without sending it.
    ///
    /// Fails with [`ClientError::PoolExhausted`] if every packet is in use.
    pub fn acquire_packet(&self, accounts: &[Account], context: C) -> Result<Packet<C>> {
        self.check_open()?;
        validate_accounts(accounts, &self.config)?;
        let body = encode_accounts(accounts)?;
        self.prepare(Operation::CreateAccounts, accounts.len(), body, context)
    }

    /// Send a packet obtained from [`Client::acquire_packet`].
    ///
    /// Fails with [`ClientError::Reconnecting`] if the session is not
    /// connected; the packet is released in that case.
    pub fn submit_packet(&self, packet: Packet<C>) -> Result<Completion<C, Vec<AccountResult>>> {
        self.send(packet, decode_create_reply)
    }

    /// Return an unsent packet to the pool.
    pub fn release_packet(&self, packet: Packet<C>) -> Result<()> {
        packet.release()
    }

    /// Context of the most recently completed packet.
    ///
    /// With several packets in flight this races with other completions;
    /// prefer the context carried by each [`CompletionEvent`](crate::CompletionEvent).
    pub fn completion_context(&self) -> Option<C> {
        self.last_context.lock().clone()
    }

    /// Shut down and wait for the I/O thread to exit.
    ///
    /// Every in-flight packet completes with
    /// [`ClientError::Cancelled`]`(`[`CancelReason::Shutdown`](crate::CancelReason::Shutdown)`)`.
    /// Later calls on this handle fail with [`ClientError::Shutdown`].
    /// Idempotent.
    pub fn deinit(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(SessionCommand::Close(None));
        self.join_io_thread();
    }

    /// Async variant of [`Client::deinit`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (done, closed) = oneshot::channel();
        if self.commands.send(SessionCommand::Close(Some(done))).is_ok() {
            let _ = closed.await;
        }
        self.join_io_thread();
    }

    fn join_io_thread(&self) {
        let Some(handle) = self.io_thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        let _ = handle.join();
        info!(client = self.id, "client closed");
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Shutdown);
        }
        Ok(())
    }

    fn prepare(
        &self,
        operation: Operation,
        count: usize,
        body: Vec<u8>,
        context: C,
    ) -> Result<Packet<C>> {
        let id = self.pool.acquire()?;
        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let message = MessageBuilder::request(self.cluster, self.id)
            .correlation(correlation)
            .operation(operation)
            .version(self.config.wire_version())
            .count(count as u32)
            .body(body)
            .build();
        Ok(Packet::new(
            id,
            operation,
            count as u32,
            message,
            context,
            Arc::clone(&self.pool),
        ))
    }

    fn send<R>(&self, packet: Packet<C>, decode: Decoder<R>) -> Result<Completion<C, R>> {
        self.check_open()?;
        if !packet.belongs_to(&self.pool) {
            return Err(ClientError::InvalidPacketState {
                packet: packet.id(),
                state: PacketState::Released,
            });
        }
        if self.state.get() != SessionState::Connected {
            return Err(ClientError::Reconnecting);
        }

        let count = packet.count();
        let (id, message, context) = packet.into_sent()?;
        let correlation = message.correlation();

        let (tx, rx) = oneshot::channel();
        let pool = Arc::clone(&self.pool);
        let last_context = Arc::clone(&self.last_context);
        let complete: Completer = Box::new(move |outcome| {
            let _ = pool.complete(id);
            *last_context.lock() = Some(context.clone());
            if tx.send(Delivery { context, outcome }).is_err() {
                // Nobody is waiting for this packet any more.
                let _ = pool.release(id);
            }
        });

        let request = Request {
            correlation,
            message,
            complete,
        };
        if let Err(mpsc::error::SendError(command)) =
            self.commands.send(SessionCommand::Send(request))
        {
            if let SessionCommand::Send(request) = command {
                (request.complete)(Err(ClientError::Shutdown));
            }
        }

        debug!(correlation, packet = %id, count, "submitted");
        Ok(Completion::new(
            id,
            correlation,
            count,
            self.config.wire_version(),
            rx,
            decode,
            Arc::clone(&self.pool),
        ))
    }
}

impl<C> Drop for Client<C> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(SessionCommand::Close(None));
        if let Some(handle) = self.io_thread.get_mut().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl<C> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("cluster", &self.cluster)
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("pool", &self.pool)
            .finish()
    }
}

fn check_batch_len(len: usize, limit: u32) -> std::result::Result<(), ValidationError> {
    if len == 0 {
        return Err(ValidationError::EmptyBatch);
    }
    if len > limit as usize {
        return Err(ValidationError::BatchTooLarge {
            count: len,
            limit: limit as usize,
        });
    }
    Ok(())
}

/// Local checks on a create-accounts batch.
fn validate_accounts(
    accounts: &[Account],
    config: &Config,
) -> std::result::Result<(), ValidationError> {
    check_batch_len(accounts.len(), config.max_batch_count())?;

    for (index, account) in accounts.iter().enumerate() {
        if account.timestamp != 0 {
            return Err(ValidationError::TimestampMustBeZero { index });
        }
        if account.reserved != 0 {
            return Err(ValidationError::ReservedField { index });
        }
        let within = |total: Option<u64>| total.is_some_and(|total| total <= config.max_balance);
        if !within(account.credits_total()) || !within(account.debits_total()) {
            return Err(ValidationError::LimitExceeded {
                index,
                limit: config.max_balance,
            });
        }
    }
    Ok(())
}

/// Local checks on a create-transfers batch.
fn validate_transfers(
    transfers: &[Transfer],
    config: &Config,
) -> std::result::Result<(), ValidationError> {
    check_batch_len(transfers.len(), config.max_transfer_batch_count())?;

    for (index, transfer) in transfers.iter().enumerate() {
        if transfer.timestamp != 0 {
            return Err(ValidationError::TimestampMustBeZero { index });
        }
        if transfer.reserved != 0 {
            return Err(ValidationError::ReservedField { index });
        }
        if transfer.amount > u128::from(config.max_balance) {
            return Err(ValidationError::LimitExceeded {
                index,
                limit: config.max_balance,
            });
        }
    }
    Ok(())
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for creating a [`Client`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// let client: Client<u64> = Client::builder()
///     .cluster(0)
///     .address("127.0.0.1:3000")?
///     .config(Config { max_credits: 8, ..Default::default() })
///     .build()
///     .await?;
/// ```
pub struct ClientBuilder {
    cluster: u128,
    address: Option<SocketAddr>,
    config: Config,
    connect_timeout: Duration,
    request_timeout: Duration,
    reconnect_backoff_min: Duration,
    reconnect_backoff_max: Duration,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            cluster: 0,
            address: None,
            config: Config::default(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            reconnect_backoff_min: Duration::from_millis(100),
            reconnect_backoff_max: Duration::from_secs(5),
        }
    }

    /// Set the cluster ID.
    pub fn cluster(mut self, id: u128) -> Self {
        self.cluster = id;
        self
    }

    /// Set the server address from a `host:port` string.
    pub fn address(self, address: &str) -> Result<Self> {
        let resolved = resolve(address.trim().to_socket_addrs(), address)?;
        Ok(self.socket_addr(resolved))
    }

    /// Set the server address from a host and a port.
    pub fn address_port(self, host: &str, port: u16) -> Result<Self> {
        let resolved = resolve((host.trim(), port).to_socket_addrs(), host)?;
        Ok(self.socket_addr(resolved))
    }

    /// Set the server address.
    pub fn socket_addr(mut self, addr: SocketAddr) -> Self {
        self.address = Some(addr);
        self
    }

    /// Set the requested configuration. Zero fields take the server's defaults.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set connection and registration timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long a request may wait for its reply.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect backoff range.
    pub fn reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_backoff_min = min;
        self.reconnect_backoff_max = max.max(min);
        self
    }

    /// Build the client.
    ///
    /// Starts the I/O thread, connects, registers and negotiates the
    /// configuration. Works on any executor.
    pub async fn build<C: Clone + Send + 'static>(self) -> Result<Client<C>> {
        let addr = self
            .address
            .ok_or_else(|| InitError::AddressInvalid("no address provided".into()))?;
        self.config.validate()?;

        let id = loop {
            let id: u128 = rand::random();
            if id != 0 {
                break id;
            }
        };

        let options = SessionOptions {
            addr,
            cluster: self.cluster,
            client: id,
            config: self.config,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            reconnect_backoff_min: self.reconnect_backoff_min,
            reconnect_backoff_max: self.reconnect_backoff_max,
        };

        let state = SharedState::new(SessionState::Disconnected);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<Config, InitError>>();

        let session_state = state.clone();
        let io_thread = thread::Builder::new()
            .name("tb-client-io".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(InitError::SystemResources(e)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    match Session::connect(options, session_state).await {
                        Ok(session) => {
                            if ready_tx.send(Ok(session.config())).is_ok() {
                                session.run(commands_rx).await;
                            }
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                });
            })
            .map_err(InitError::SystemResources)?;

        let config = match ready_rx.await {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                let _ = io_thread.join();
                return Err(e.into());
            }
            Err(_) => {
                let _ = io_thread.join();
                return Err(InitError::SystemResources(io::Error::other(
                    "I/O thread exited during startup",
                ))
                .into());
            }
        };

        let pool = PacketPool::new(config.packet_count());
        info!(
            client = id,
            cluster = self.cluster,
            packets = pool.capacity(),
            batch = config.max_batch_count(),
            "client ready"
        );

        Ok(Client {
            id,
            cluster: self.cluster,
            config,
            pool: Arc::new(pool),
            state,
            commands,
            next_correlation: AtomicU64::new(1),
            last_context: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
            io_thread: Mutex::new(Some(io_thread)),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve<I>(addrs: io::Result<I>, input: &str) -> Result<SocketAddr>
where
    I: Iterator<Item = SocketAddr>,
{
    addrs
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| InitError::AddressInvalid(input.to_string()).into())
}
