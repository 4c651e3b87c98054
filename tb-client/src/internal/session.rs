//! Transport session.
//!
//! The session owns the TCP connection and runs on a dedicated I/O thread.
//! Callers hand it [`Request`]s over an unbounded channel; each request
//! carries a one-shot completer that the session invokes exactly once with
//! the reply, a timeout or a cancellation.
//!
//! Socket I/O happens in a reader task and a writer task per connection.
//! The event loop itself never awaits the socket, so a peer that stops
//! reading cannot stall timeouts or shutdown.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting
//!                                   |              |
//!                                   +--> Disconnected (close)
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connection::{self, FrameError};
use crate::config::Config;
use crate::error::{CancelReason, ClientError, InitError, Result};
use crate::protocol::{Command, Message};

/// Granularity of request timeout checks.
const TICK: Duration = Duration::from_millis(10);

/// Connection state of a session, as observed by the client handle.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Not connected. Terminal once the client is closed.
    Disconnected = 0,
    /// Initial connect and register in progress.
    Connecting = 1,
    /// Registered and accepting requests.
    Connected = 2,
    /// Connection lost; reconnecting with backoff.
    Reconnecting = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            3 => SessionState::Reconnecting,
            _ => SessionState::Disconnected,
        }
    }
}

/// Session state shared between the I/O thread and client handles.
#[derive(Clone, Debug)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Invoked exactly once with the outcome of a request.
pub(crate) type Completer = Box<dyn FnOnce(Result<Message>) + Send>;

/// One request handed to the session.
pub(crate) struct Request {
    pub correlation: u64,
    pub message: Message,
    pub complete: Completer,
}

/// Messages from client handles to the session.
pub(crate) enum SessionCommand {
    Send(Request),
    Close(Option<oneshot::Sender<()>>),
}

/// Connection parameters fixed at client creation.
#[derive(Clone, Debug)]
pub(crate) struct SessionOptions {
    pub addr: SocketAddr,
    pub cluster: u128,
    pub client: u128,
    pub config: Config,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
}

type FrameResult = std::result::Result<Message, FrameError>;

struct Link {
    outgoing: mpsc::UnboundedSender<Message>,
    frames: mpsc::UnboundedReceiver<FrameResult>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct InFlight {
    complete: Completer,
    deadline: Instant,
}

/// Session event loop state.
pub(crate) struct Session {
    options: SessionOptions,
    state: SharedState,
    link: Option<Link>,
    in_flight: HashMap<u64, InFlight>,
    reconnect_at: Option<Instant>,
    attempts: u32,
}

impl Session {
    /// Connect and register.
    ///
    /// The returned session uses the negotiated configuration; later
    /// reconnects request exactly that configuration again.
    pub async fn connect(
        mut options: SessionOptions,
        state: SharedState,
    ) -> std::result::Result<Session, InitError> {
        state.set(SessionState::Connecting);
        let (link, config) = match establish(&options, &options.config).await {
            Ok(established) => established,
            Err(e) => {
                state.set(SessionState::Disconnected);
                return Err(e);
            }
        };
        info!(
            addr = %options.addr,
            client = options.client,
            max_credits = config.max_credits,
            max_debits = config.max_debits,
            size = config.size,
            "registered"
        );
        options.config = config;
        state.set(SessionState::Connected);

        Ok(Session {
            options,
            state,
            link: Some(link),
            in_flight: HashMap::new(),
            reconnect_at: None,
            attempts: 0,
        })
    }

    /// Negotiated configuration.
    pub fn config(&self) -> Config {
        self.options.config
    }

    /// Run until the client closes the session or every handle is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Send(request)) => self.dispatch(request),
                    Some(SessionCommand::Close(done)) => {
                        self.shutdown(&mut commands);
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                        return;
                    }
                    None => {
                        self.shutdown(&mut commands);
                        return;
                    }
                },
                frame = next_frame(&mut self.link) => match frame {
                    Some(Ok(message)) => self.on_reply(message),
                    Some(Err(e)) => {
                        warn!(error = %e, "dropping connection");
                        self.on_disconnect();
                    }
                    None => self.on_disconnect(),
                },
                _ = tick.tick() => self.expire(Instant::now()),
                _ = wait_until(self.reconnect_at) => self.reconnect().await,
            }
        }
    }

    fn dispatch(&mut self, request: Request) {
        let Request {
            correlation,
            message,
            complete,
        } = request;

        let Some(link) = self.link.as_ref() else {
            complete(Err(ClientError::Reconnecting));
            return;
        };

        if link.outgoing.send(message).is_err() {
            warn!(correlation, "writer stopped");
            complete(Err(ClientError::Cancelled(CancelReason::ConnectionLost)));
            self.on_disconnect();
            return;
        }

        let deadline = Instant::now() + self.options.request_timeout;
        self.in_flight
            .insert(correlation, InFlight { complete, deadline });
    }

    fn on_reply(&mut self, message: Message) {
        let header = message.header();
        if header.command() != Some(Command::Reply)
            || header.client.get() != self.options.client
            || header.cluster.get() != self.options.cluster
        {
            debug!(
                command = header.command,
                correlation = message.correlation(),
                "ignoring message not addressed to this client"
            );
            return;
        }

        match self.in_flight.remove(&message.correlation()) {
            Some(request) => (request.complete)(Ok(message)),
            None => debug!(
                correlation = message.correlation(),
                "dropping reply for unknown or expired request"
            ),
        }
    }

    fn expire(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(correlation, _)| *correlation)
            .collect();

        for correlation in expired {
            if let Some(request) = self.in_flight.remove(&correlation) {
                warn!(correlation, "request timed out");
                (request.complete)(Err(ClientError::Timeout));
            }
        }
    }

    fn cancel_in_flight(&mut self, reason: CancelReason) {
        if !self.in_flight.is_empty() {
            debug!(count = self.in_flight.len(), %reason, "cancelling in-flight requests");
        }
        for (_, request) in self.in_flight.drain() {
            (request.complete)(Err(ClientError::Cancelled(reason)));
        }
    }

    fn on_disconnect(&mut self) {
        self.link = None;
        self.state.set(SessionState::Reconnecting);
        self.cancel_in_flight(CancelReason::ConnectionLost);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = backoff(
            self.attempts,
            self.options.reconnect_backoff_min,
            self.options.reconnect_backoff_max,
        );
        self.attempts = self.attempts.saturating_add(1);
        debug!(?delay, attempt = self.attempts, "scheduling reconnect");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn reconnect(&mut self) {
        self.reconnect_at = None;

        match establish(&self.options, &self.options.config).await {
            Ok((link, config)) => {
                if config != self.options.config {
                    warn!(?config, "server offered different limits; keeping the original ones");
                }
                info!(addr = %self.options.addr, attempts = self.attempts, "reconnected");
                self.link = Some(link);
                self.attempts = 0;
                self.state.set(SessionState::Connected);
            }
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "reconnect failed");
                self.schedule_reconnect();
            }
        }
    }

    fn shutdown(&mut self, commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
        self.state.set(SessionState::Disconnected);
        self.link = None;
        self.reconnect_at = None;
        self.cancel_in_flight(CancelReason::Shutdown);

        commands.close();
        while let Ok(command) = commands.try_recv() {
            match command {
                SessionCommand::Send(request) => {
                    (request.complete)(Err(ClientError::Cancelled(CancelReason::Shutdown)));
                }
                SessionCommand::Close(Some(done)) => {
                    let _ = done.send(());
                }
                SessionCommand::Close(None) => {}
            }
        }
        info!(client = self.options.client, "session closed");
    }
}

/// Connect, register and start the reader and writer tasks.
async fn establish(
    options: &SessionOptions,
    requested: &Config,
) -> std::result::Result<(Link, Config), InitError> {
    let mut stream = connection::connect(options.addr, options.connect_timeout).await?;

    let config = tokio::time::timeout(
        options.connect_timeout,
        connection::register(
            &mut stream,
            options.cluster,
            options.client,
            requested,
            crate::protocol::MESSAGE_SIZE_MAX,
        ),
    )
    .await
    .map_err(|_| InitError::Timeout)??;

    let (reader, writer) = stream.into_split();
    let (tx, frames) = mpsc::unbounded_channel();
    let (outgoing, queue) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(writer, queue, tx.clone()));
    let reader = tokio::spawn(read_frames(reader, config.size, tx));

    Ok((
        Link {
            outgoing,
            frames,
            reader,
            writer,
        },
        config,
    ))
}

/// Write queued messages in order. A failed write is reported through the
/// frame channel so the event loop handles it like a broken read.
async fn write_frames<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Message>,
    frames: mpsc::UnboundedSender<FrameResult>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = connection::write_message(&mut writer, &message).await {
            let _ = frames.send(Err(FrameError::Io(e)));
            return;
        }
    }
}

/// Forward decoded frames until the connection fails.
async fn read_frames(
    mut reader: OwnedReadHalf,
    size_max: u32,
    tx: mpsc::UnboundedSender<FrameResult>,
) {
    loop {
        match connection::read_message(&mut reader, size_max).await {
            Ok(message) => {
                if tx.send(Ok(message)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

async fn next_frame(link: &mut Option<Link>) -> Option<FrameResult> {
    match link {
        Some(link) => link.frames.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Exponential backoff with up to 50% jitter, capped at `max`.
fn backoff(attempt: u32, min: Duration, max: Duration) -> Duration {
    let base = min.saturating_mul(1u32 << attempt.min(16)).min(max);
    let jitter_ms = base.as_millis() as u64 / 2;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    };
    (base + jitter).min(max)
}
