//! Error types for the ledger client.
//!
//! Errors fall into a few families: local validation ([`ValidationError`]),
//! backpressure ([`ClientError::PoolExhausted`]), transient connection
//! trouble, per-packet protocol failures ([`ProtocolError`]), caller misuse
//! and lifecycle. Only handle creation reports [`InitError`].

use std::fmt;

use thiserror::Error;

use crate::internal::pool::{PacketId, PacketState};
use crate::protocol::PacketStatus;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The batch was rejected locally and never sent.
    #[error("invalid batch: {0}")]
    Validation(#[from] ValidationError),

    /// Every packet is in use. Retry once an in-flight packet completes.
    #[error("packet pool exhausted")]
    PoolExhausted,

    /// The session is not connected. Nothing was sent.
    #[error("session is reconnecting")]
    Reconnecting,

    /// The request was sent but will never be answered.
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),

    /// A reply could not be decoded or failed validation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A packet operation was attempted from the wrong state.
    #[error("packet {packet} is {state}")]
    InvalidPacketState {
        /// The packet that was addressed.
        packet: PacketId,
        /// Its current state.
        state: PacketState,
    },

    /// The server refused the whole packet.
    #[error("packet rejected by server: {0}")]
    Rejected(PacketStatus),

    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The client has been shut down.
    #[error("client is shut down")]
    Shutdown,

    /// Client creation failed.
    #[error("initialization failed: {0}")]
    Init(#[from] InitError),
}

impl ClientError {
    /// Returns true if retrying the same batch later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::PoolExhausted
                | ClientError::Reconnecting
                | ClientError::Timeout
                | ClientError::Cancelled(CancelReason::ConnectionLost)
        )
    }
}

/// Why an in-flight request was cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// The connection dropped before the reply arrived.
    ConnectionLost,
    /// The client was shut down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::ConnectionLost => write!(f, "connection lost"),
            CancelReason::Shutdown => write!(f, "client shutdown"),
        }
    }
}

/// Batch validation failures. Nothing is sent when these occur.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ValidationError {
    /// The batch has no records.
    #[error("batch is empty")]
    EmptyBatch,

    /// The batch has more records than one packet may carry.
    #[error("batch of {count} records exceeds limit of {limit}")]
    BatchTooLarge {
        /// Records submitted.
        count: usize,
        /// Negotiated batch limit.
        limit: usize,
    },

    /// A record's credit or debit total exceeds the negotiated maximum balance.
    #[error("record {index} exceeds maximum balance {limit}")]
    LimitExceeded {
        /// Position of the record in the batch.
        index: usize,
        /// Negotiated maximum balance.
        limit: u64,
    },

    /// Timestamps are assigned by the server.
    #[error("record {index} has a non-zero timestamp")]
    TimestampMustBeZero {
        /// Position of the record in the batch.
        index: usize,
    },

    /// Reserved fields must be zero.
    #[error("record {index} has a non-zero reserved field")]
    ReservedField {
        /// Position of the record in the batch.
        index: usize,
    },
}

/// Protocol-level errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ProtocolError {
    /// Invalid header checksum.
    #[error("invalid header checksum")]
    InvalidHeaderChecksum,
    /// Invalid body checksum.
    #[error("invalid body checksum")]
    InvalidBodyChecksum,
    /// Invalid header structure.
    #[error("invalid header structure")]
    InvalidHeader,
    /// Invalid operation.
    #[error("invalid operation")]
    InvalidOperation,
    /// Invalid command.
    #[error("invalid command")]
    InvalidCommand,
    /// Invalid message size.
    #[error("invalid message size")]
    InvalidSize,
    /// Reply does not belong to the request it was matched with.
    #[error("unexpected reply")]
    UnexpectedReply,
    /// A record in the body violates the record layout.
    #[error("malformed record at index {index}")]
    MalformedRecord {
        /// Position of the record in the body.
        index: usize,
    },
    /// The body is not a whole number of elements.
    #[error("truncated buffer")]
    TruncatedBuffer,
    /// The reply speaks a different protocol version.
    #[error("unsupported protocol version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Negotiated version.
        expected: u16,
        /// Version found in the reply.
        found: u16,
    },
    /// Results do not correspond one-to-one with the submitted batch.
    #[error("results do not match the submitted batch")]
    ResultMismatch,
}

/// Client creation failures.
#[derive(Debug, Error)]
pub enum InitError {
    /// The address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    AddressInvalid(String),

    /// The TCP connection could not be established.
    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Connecting or registering took longer than the connect timeout.
    #[error("timed out connecting to server")]
    Timeout,

    /// The I/O thread or its runtime could not be started.
    #[error("system resources: {0}")]
    SystemResources(#[source] std::io::Error),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Client and server disagree on the protocol version.
    #[error("unsupported protocol version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version requested by the client.
        expected: u32,
        /// Version offered by the server.
        found: u32,
    },

    /// The server refused registration.
    #[error("registration rejected: {0}")]
    Rejected(PacketStatus),

    /// The registration reply was invalid.
    #[error("registration protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_client_error_display() {
        assert_eq!(ClientError::Timeout.to_string(), "request timed out");
        assert_eq!(
            ClientError::Cancelled(CancelReason::ConnectionLost).to_string(),
            "request cancelled: connection lost"
        );
        assert_eq!(
            ClientError::Rejected(PacketStatus::TooMuchData).to_string(),
            "packet rejected by server: too much data"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::BatchTooLarge { count: 9, limit: 8 };
        assert_eq!(err.to_string(), "batch of 9 records exceeds limit of 8");

        let err: ClientError = ValidationError::EmptyBatch.into();
        assert_eq!(err.to_string(), "invalid batch: batch is empty");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnsupportedVersion {
            expected: 1,
            found: 2,
        };
        assert_eq!(err.to_string(), "unsupported protocol version 2, expected 1");
    }

    #[test]
    fn test_error_source_chain() {
        let client_err = ClientError::Protocol(ProtocolError::InvalidHeaderChecksum);
        let source = client_err.source().unwrap();
        assert!(source.is::<ProtocolError>());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let init_err: ClientError = InitError::ConnectFailed(io).into();
        assert!(init_err.source().unwrap().is::<InitError>());
    }

    #[test]
    fn test_is_transient() {
        assert!(ClientError::PoolExhausted.is_transient());
        assert!(ClientError::Cancelled(CancelReason::ConnectionLost).is_transient());
        assert!(!ClientError::Cancelled(CancelReason::Shutdown).is_transient());
        assert!(!ClientError::Shutdown.is_transient());
    }
}
