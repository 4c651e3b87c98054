//! TCP framing and the register handshake.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::IntoBytes;

use crate::config::Config;
use crate::error::{InitError, ProtocolError};
use crate::protocol::{
    decode_register, Command, Header, Message, MessageBuilder, Operation, PacketStatus,
    HEADER_SIZE, PROTOCOL_VERSION,
};

/// Failure while reading one frame.
#[derive(Debug, Error)]
pub(crate) enum FrameError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt frame: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connect to the server.
pub(crate) async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, InitError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| InitError::Timeout)?
        .map_err(InitError::ConnectFailed)?;
    stream.set_nodelay(true).map_err(InitError::ConnectFailed)?;
    Ok(stream)
}

/// Read one complete message and verify its checksums.
pub(crate) async fn read_message<R>(reader: &mut R, size_max: u32) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header_bytes).await?;

    let header = Header::from_bytes(&header_bytes)?;
    if !header.valid_checksum() {
        return Err(ProtocolError::InvalidHeaderChecksum.into());
    }
    header.validate(size_max)?;

    let mut body = vec![0u8; header.body_size() as usize];
    reader.read_exact(&mut body).await?;

    let message = Message::from_parts(header, body)?;
    message.validate()?;
    Ok(message)
}

/// Write one message.
pub(crate) async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.to_bytes()).await?;
    writer.flush().await
}

/// Register the client and negotiate its configuration.
///
/// Sends `requested` to the server, reads the server's defaults back and
/// returns the merged configuration.
pub(crate) async fn register(
    stream: &mut TcpStream,
    cluster: u128,
    client: u128,
    requested: &Config,
    size_max: u32,
) -> Result<Config, InitError> {
    let request = MessageBuilder::request(cluster, client)
        .operation(Operation::Register)
        .count(1)
        .body(requested.to_register_body().as_bytes().to_vec())
        .build();

    write_message(stream, &request)
        .await
        .map_err(InitError::ConnectFailed)?;

    let reply = match read_message(stream, size_max).await {
        Ok(reply) => reply,
        Err(FrameError::Io(e)) => return Err(InitError::ConnectFailed(e)),
        Err(FrameError::Protocol(e)) => return Err(InitError::Protocol(e)),
    };

    let header = reply.header();
    if header.command() != Some(Command::Reply)
        || header.operation() != Some(Operation::Register)
        || header.client.get() != client
        || header.cluster.get() != cluster
    {
        return Err(InitError::Protocol(ProtocolError::UnexpectedReply));
    }
    if header.version.get() != PROTOCOL_VERSION {
        return Err(InitError::UnsupportedVersion {
            expected: PROTOCOL_VERSION as u32,
            found: header.version.get() as u32,
        });
    }
    match header.status() {
        Some(PacketStatus::Ok) => {}
        Some(status) => return Err(InitError::Rejected(status)),
        None => return Err(InitError::Protocol(ProtocolError::InvalidHeader)),
    }

    let offered = Config::from(&decode_register(reply.body())?);
    requested.negotiate(&offered)
}
