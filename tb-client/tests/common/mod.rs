//! In-process mock ledger server for integration tests.
//!
//! The server runs on its own thread and runtime so tests can drive the
//! blocking client API from plain `#[test]` functions. Its behavior is
//! scripted through [`MockServer`]: replies can be held back and flushed
//! later, connections can be dropped, and the reply version or operation can
//! be changed. [`StalledServer`] registers a client and then never reads
//! from the socket again.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tb_client::protocol::{
    decode_accounts, decode_ids, decode_register, decode_transfers, encode_accounts,
    encode_results, encode_transfer_results, encode_transfers, Header, Message, MessageBuilder,
    Operation, RegisterBody, HEADER_SIZE, MESSAGE_SIZE_MAX, PROTOCOL_VERSION,
};
use tb_client::{
    Account, AccountResult, Config, CreateAccountResult, CreateTransferResult, PacketStatus,
    Transfer, TransferResult,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::IntoBytes;

/// Defaults offered by the mock during registration.
pub fn server_defaults() -> Config {
    Config {
        size: 64 * 1024,
        version: PROTOCOL_VERSION as u32,
        max_credits: 32,
        max_debits: 32,
        max_balance: 1_000_000_000,
    }
}

/// Defaults large enough for 1 MiB batches and a full packet pool.
pub fn wide_defaults() -> Config {
    Config {
        size: MESSAGE_SIZE_MAX,
        max_credits: 16 * 1024,
        max_debits: 16 * 1024,
        ..server_defaults()
    }
}

struct Control {
    defaults: Config,
    hold: AtomicBool,
    reply_version: AtomicU16,
    /// Operation byte stamped on application replies; zero echoes the request.
    reply_operation: AtomicU8,
    requests: AtomicUsize,
    registrations: AtomicUsize,
    next_timestamp: AtomicU64,
    accounts: Mutex<HashMap<u128, Account>>,
    transfers: Mutex<HashMap<u128, Transfer>>,
}

/// Handle to a running mock server. Stops the server on drop.
pub struct MockServer {
    addr: SocketAddr,
    control: Arc<Control>,
    kill: watch::Sender<u64>,
    flush: watch::Sender<u64>,
    stop: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a server offering [`server_defaults`].
    pub fn start() -> Self {
        Self::with_defaults(server_defaults())
    }

    /// Start a server offering `defaults` during registration.
    pub fn with_defaults(defaults: Config) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("local addr");

        let control = Arc::new(Control {
            defaults,
            hold: AtomicBool::new(false),
            reply_version: AtomicU16::new(PROTOCOL_VERSION),
            reply_operation: AtomicU8::new(0),
            requests: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            next_timestamp: AtomicU64::new(1),
            accounts: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
        });
        let (kill, kill_rx) = watch::channel(0u64);
        let (flush, flush_rx) = watch::channel(0u64);
        let (stop, mut stop_rx) = watch::channel(false);

        let thread_control = Arc::clone(&control);
        let thread = std::thread::Builder::new()
            .name("mock-ledger".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("mock runtime");
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener).expect("tokio listener");
                    loop {
                        tokio::select! {
                            accepted = listener.accept() => {
                                let Ok((stream, _)) = accepted else { continue };
                                tokio::spawn(serve(
                                    stream,
                                    Arc::clone(&thread_control),
                                    kill_rx.clone(),
                                    flush_rx.clone(),
                                ));
                            }
                            _ = stop_rx.changed() => return,
                        }
                    }
                });
            })
            .expect("spawn mock server");

        Self {
            addr,
            control,
            kill,
            flush,
            stop,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Application requests received so far (registrations excluded).
    pub fn requests(&self) -> usize {
        self.control.requests.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        self.control.registrations.load(Ordering::SeqCst)
    }

    /// Hold replies back until [`MockServer::flush_held`].
    pub fn set_hold(&self, hold: bool) {
        self.control.hold.store(hold, Ordering::SeqCst);
    }

    /// Send every held reply.
    pub fn flush_held(&self) {
        self.flush.send_modify(|epoch| *epoch += 1);
    }

    /// Version stamped on application replies.
    pub fn set_reply_version(&self, version: u16) {
        self.control.reply_version.store(version, Ordering::SeqCst);
    }

    /// Operation byte stamped on application replies (zero restores the echo).
    pub fn set_reply_operation(&self, operation: u8) {
        self.control.reply_operation.store(operation, Ordering::SeqCst);
    }

    /// Close every open connection without replying.
    pub fn drop_connections(&self) {
        self.kill.send_modify(|epoch| *epoch += 1);
    }

    /// Wait until `count` application requests have arrived.
    pub fn wait_for_requests(&self, count: usize) {
        wait_until(Duration::from_secs(5), || self.requests() >= count);
    }

    /// Wait until the client has registered `count` times.
    pub fn wait_for_registrations(&self, count: usize) {
        wait_until(Duration::from_secs(5), || self.registrations() >= count);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < timeout, "condition not met within {:?}", timeout);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Accepts one client, answers its registration and then stops reading.
///
/// The socket stays open until the server is dropped, so the client's
/// writes back up once the kernel buffers are full.
pub struct StalledServer {
    addr: SocketAddr,
    release: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StalledServer {
    pub fn start(defaults: Config) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind stalled server");
        let addr = listener.local_addr().expect("local addr");
        let (release, released) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("stalled-ledger".into())
            .spawn(move || {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let Some(request) = read_frame_blocking(&mut stream) else {
                    return;
                };
                let Some(reply) = register_reply(&defaults, &request) else {
                    return;
                };
                if std::io::Write::write_all(&mut stream, &reply.to_bytes()).is_err() {
                    return;
                }
                // Hold the connection without reading until released.
                let _ = released.recv();
                drop(stream);
            })
            .expect("spawn stalled server");

        Self {
            addr,
            release: Some(release),
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for StalledServer {
    fn drop(&mut self) {
        drop(self.release.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn read_frame_blocking(stream: &mut std::net::TcpStream) -> Option<Message> {
    use std::io::Read;

    let mut header_bytes = [0u8; HEADER_SIZE as usize];
    stream.read_exact(&mut header_bytes).ok()?;
    let header = Header::from_bytes(&header_bytes).ok()?;
    let mut body = vec![0u8; header.body_size() as usize];
    stream.read_exact(&mut body).ok()?;
    let message = Message::from_parts(header, body).ok()?;
    message.validate().ok()?;
    Some(message)
}

/// Answer a register request with `defaults`.
pub fn register_reply(defaults: &Config, request: &Message) -> Option<Message> {
    decode_register(request.body()).ok()?;
    let header = request.header();
    let body = RegisterBody {
        size: U32::new(defaults.size),
        version: U32::new(defaults.version),
        max_credits: U32::new(defaults.max_credits),
        max_debits: U32::new(defaults.max_debits),
        max_balance: U64::new(defaults.max_balance),
        reserved: [0; 8],
    };
    Some(
        MessageBuilder::reply(header.cluster.get(), header.client.get())
            .correlation(request.correlation())
            .operation(Operation::Register)
            .count(1)
            .body(body.as_bytes().to_vec())
            .build(),
    )
}

/// A valid account with a fresh id.
pub fn account(code: u32) -> Account {
    Account {
        id: tb_client::id(),
        user_data: code as u64,
        ledger: 1,
        code,
        ..Default::default()
    }
}

/// A valid transfer of `amount` between two accounts on ledger 1.
pub fn transfer(debit: u128, credit: u128, amount: u128) -> Transfer {
    Transfer {
        id: tb_client::id(),
        debit_account_id: debit,
        credit_account_id: credit,
        amount,
        ledger: 1,
        code: 1,
        ..Default::default()
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Option<Message> {
    let mut header_bytes = [0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header_bytes).await.ok()?;
    let header = Header::from_bytes(&header_bytes).ok()?;
    let mut body = vec![0u8; header.body_size() as usize];
    reader.read_exact(&mut body).await.ok()?;
    let message = Message::from_parts(header, body).ok()?;
    message.validate().ok()?;
    Some(message)
}

async fn serve(
    stream: TcpStream,
    control: Arc<Control>,
    mut kill: watch::Receiver<u64>,
    mut flush: watch::Receiver<u64>,
) {
    kill.borrow_and_update();
    flush.borrow_and_update();

    let (mut reader, mut writer) = stream.into_split();
    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(async move {
        while let Some(message) = read_frame(&mut reader).await {
            if frames_tx.send(message).is_err() {
                break;
            }
        }
    });

    let mut held: Vec<Message> = Vec::new();
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(request) = frame else { break };
                let Some(reply) = handle(&control, &request) else { continue };
                let is_register = request.header().operation() == Some(Operation::Register);
                if !is_register && control.hold.load(Ordering::SeqCst) {
                    held.push(reply);
                    continue;
                }
                if writer.write_all(&reply.to_bytes()).await.is_err() {
                    break;
                }
            }
            _ = flush.changed() => {
                for reply in held.drain(..) {
                    if writer.write_all(&reply.to_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            _ = kill.changed() => break,
        }
    }
    reader_task.abort();
}

fn handle(control: &Control, request: &Message) -> Option<Message> {
    let header = request.header();
    let operation = header.operation()?;
    if operation == Operation::Register {
        let reply = register_reply(&control.defaults, request)?;
        control.registrations.fetch_add(1, Ordering::SeqCst);
        return Some(reply);
    }

    control.requests.fetch_add(1, Ordering::SeqCst);
    let reply = || {
        MessageBuilder::reply(header.cluster.get(), header.client.get())
            .correlation(request.correlation())
            .operation(operation)
            .version(control.reply_version.load(Ordering::SeqCst))
    };
    let invalid = || reply().status(PacketStatus::InvalidDataSize).build();

    let mut message = match operation {
        Operation::CreateAccounts => {
            let Ok(accounts) = decode_accounts(request.body()) else {
                return Some(invalid());
            };
            let mut results = create_accounts(control, &accounts);
            // Answer out of order; the client must restore batch order.
            results.reverse();
            reply()
                .count(results.len() as u32)
                .body(encode_results(&results))
                .build()
        }
        Operation::CreateTransfers => {
            let Ok(transfers) = decode_transfers(request.body()) else {
                return Some(invalid());
            };
            let mut results = create_transfers(control, &transfers);
            results.reverse();
            reply()
                .count(results.len() as u32)
                .body(encode_transfer_results(&results))
                .build()
        }
        Operation::LookupAccounts => {
            let Ok(ids) = decode_ids(request.body()) else {
                return Some(invalid());
            };
            let found: Vec<Account> = {
                let accounts = control.accounts.lock();
                ids.iter().filter_map(|id| accounts.get(id).copied()).collect()
            };
            reply()
                .count(found.len() as u32)
                .body(encode_accounts(&found).ok()?)
                .build()
        }
        Operation::LookupTransfers => {
            let Ok(ids) = decode_ids(request.body()) else {
                return Some(invalid());
            };
            let found: Vec<Transfer> = {
                let transfers = control.transfers.lock();
                ids.iter().filter_map(|id| transfers.get(id).copied()).collect()
            };
            reply()
                .count(found.len() as u32)
                .body(encode_transfers(&found).ok()?)
                .build()
        }
        Operation::Register | Operation::Reserved => return None,
    };

    let stamped = control.reply_operation.load(Ordering::SeqCst);
    if stamped != 0 {
        message.header_mut().operation = stamped;
        message.finalize();
    }
    Some(message)
}

fn create_accounts(control: &Control, batch: &[Account]) -> Vec<AccountResult> {
    let mut accounts = control.accounts.lock();
    batch
        .iter()
        .enumerate()
        .map(|(index, account)| {
            let code = if account.id == 0 {
                CreateAccountResult::IdMustNotBeZero
            } else if account.ledger == 0 {
                CreateAccountResult::LedgerMustNotBeZero
            } else if account.code == 0 {
                CreateAccountResult::CodeMustNotBeZero
            } else if accounts.contains_key(&account.id) {
                CreateAccountResult::Exists
            } else {
                CreateAccountResult::Ok
            };

            let timestamp = if code == CreateAccountResult::Ok {
                let timestamp = control.next_timestamp.fetch_add(1, Ordering::SeqCst);
                accounts.insert(
                    account.id,
                    Account {
                        timestamp,
                        ..*account
                    },
                );
                timestamp
            } else {
                0
            };

            AccountResult {
                index: index as u32,
                result: code,
                timestamp,
            }
        })
        .collect()
}

fn create_transfers(control: &Control, batch: &[Transfer]) -> Vec<TransferResult> {
    let mut accounts = control.accounts.lock();
    let mut transfers = control.transfers.lock();
    batch
        .iter()
        .enumerate()
        .map(|(index, transfer)| {
            let code = transfer_code(&accounts, &transfers, transfer);
            let timestamp = if code == CreateTransferResult::Ok {
                let timestamp = control.next_timestamp.fetch_add(1, Ordering::SeqCst);
                let amount = transfer.amount as u64;
                if let Some(debit) = accounts.get_mut(&transfer.debit_account_id) {
                    debit.debits_posted += amount;
                }
                if let Some(credit) = accounts.get_mut(&transfer.credit_account_id) {
                    credit.credits_posted += amount;
                }
                transfers.insert(
                    transfer.id,
                    Transfer {
                        timestamp,
                        ..*transfer
                    },
                );
                timestamp
            } else {
                0
            };

            TransferResult {
                index: index as u32,
                result: code,
                timestamp,
            }
        })
        .collect()
}

fn transfer_code(
    accounts: &HashMap<u128, Account>,
    transfers: &HashMap<u128, Transfer>,
    transfer: &Transfer,
) -> CreateTransferResult {
    if transfer.id == 0 {
        return CreateTransferResult::IdMustNotBeZero;
    }
    if transfer.debit_account_id == 0 {
        return CreateTransferResult::DebitAccountIdMustNotBeZero;
    }
    if transfer.credit_account_id == 0 {
        return CreateTransferResult::CreditAccountIdMustNotBeZero;
    }
    if transfer.debit_account_id == transfer.credit_account_id {
        return CreateTransferResult::AccountsMustBeDifferent;
    }
    if transfer.ledger == 0 {
        return CreateTransferResult::LedgerMustNotBeZero;
    }
    if transfer.code == 0 {
        return CreateTransferResult::CodeMustNotBeZero;
    }
    if let Some(existing) = transfers.get(&transfer.id) {
        return if existing.amount == transfer.amount {
            CreateTransferResult::Exists
        } else {
            CreateTransferResult::ExistsWithDifferentAmount
        };
    }
    let Some(debit) = accounts.get(&transfer.debit_account_id) else {
        return CreateTransferResult::DebitAccountNotFound;
    };
    let Some(credit) = accounts.get(&transfer.credit_account_id) else {
        return CreateTransferResult::CreditAccountNotFound;
    };
    if debit.ledger != credit.ledger {
        return CreateTransferResult::AccountsMustHaveTheSameLedger;
    }
    if transfer.ledger != debit.ledger {
        return CreateTransferResult::TransferMustHaveTheSameLedgerAsAccounts;
    }
    let Ok(amount) = u64::try_from(transfer.amount) else {
        return CreateTransferResult::OverflowsDebitsPosted;
    };
    if debit.debits_posted.checked_add(amount).is_none() {
        return CreateTransferResult::OverflowsDebitsPosted;
    }
    if credit.credits_posted.checked_add(amount).is_none() {
        return CreateTransferResult::OverflowsCreditsPosted;
    }
    CreateTransferResult::Ok
}
