//! Message commands, state machine operations and reply status codes.

use std::fmt;

/// Message command types.
///
/// Values match the replication protocol numbering used by the server; only
/// the client-facing subset is represented.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Command {
    /// Reserved/invalid command (default).
    #[default]
    Reserved = 0,
    /// Client request message.
    Request = 5,
    /// Reply to a client request.
    Reply = 8,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Reserved),
            5 => Ok(Command::Request),
            8 => Ok(Command::Reply),
            _ => Err(value),
        }
    }
}

/// Operations reserved for the session layer are below this value.
pub const SESSION_OPERATIONS_RESERVED: u8 = 128;

/// Operations carried in a request header.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Operation {
    /// Reserved/invalid operation (default).
    #[default]
    Reserved = 0,
    /// Register a client session and negotiate configuration.
    Register = 2,
    /// Create accounts (batch of account records).
    CreateAccounts = 138,
    /// Create transfers (batch of transfer records).
    CreateTransfers = 139,
    /// Lookup accounts by ID (batch of 128-bit ids).
    LookupAccounts = 140,
    /// Lookup transfers by ID (batch of 128-bit ids).
    LookupTransfers = 141,
}

impl Operation {
    /// Returns true if this is a session-layer operation.
    pub fn is_session_reserved(self) -> bool {
        (self as u8) < SESSION_OPERATIONS_RESERVED
    }

    /// Size in bytes of one request element for this operation.
    pub fn event_size(self) -> usize {
        match self {
            Operation::CreateAccounts => super::types::ACCOUNT_SIZE,
            Operation::CreateTransfers => super::types::TRANSFER_SIZE,
            Operation::LookupAccounts | Operation::LookupTransfers => std::mem::size_of::<u128>(),
            Operation::Register => super::types::REGISTER_BODY_SIZE,
            Operation::Reserved => 0,
        }
    }

    /// Size in bytes of one reply element for this operation.
    pub fn result_size(self) -> usize {
        match self {
            Operation::CreateAccounts => super::types::ACCOUNT_RESULT_SIZE,
            Operation::CreateTransfers => super::types::TRANSFER_RESULT_SIZE,
            Operation::LookupAccounts => super::types::ACCOUNT_SIZE,
            Operation::LookupTransfers => super::types::TRANSFER_SIZE,
            Operation::Register => super::types::REGISTER_BODY_SIZE,
            Operation::Reserved => 0,
        }
    }
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Reserved),
            2 => Ok(Operation::Register),
            138 => Ok(Operation::CreateAccounts),
            139 => Ok(Operation::CreateTransfers),
            140 => Ok(Operation::LookupAccounts),
            141 => Ok(Operation::LookupTransfers),
            _ => Err(value),
        }
    }
}

/// Whole-packet status carried in a reply header.
///
/// Anything other than [`PacketStatus::Ok`] means the server refused the
/// packet before looking at individual records.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum PacketStatus {
    /// Operation completed; per-record outcomes are in the body.
    #[default]
    Ok = 0,
    /// Request data was too large.
    TooMuchData = 1,
    /// Client was evicted.
    ClientEvicted = 2,
    /// Client release is too old.
    ClientReleaseTooLow = 3,
    /// Client release is too new.
    ClientReleaseTooHigh = 4,
    /// Server is shutting the session down.
    ClientShutdown = 5,
    /// Invalid operation.
    InvalidOperation = 6,
    /// Invalid data size.
    InvalidDataSize = 7,
}

impl TryFrom<u8> for PacketStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketStatus::Ok),
            1 => Ok(PacketStatus::TooMuchData),
            2 => Ok(PacketStatus::ClientEvicted),
            3 => Ok(PacketStatus::ClientReleaseTooLow),
            4 => Ok(PacketStatus::ClientReleaseTooHigh),
            5 => Ok(PacketStatus::ClientShutdown),
            6 => Ok(PacketStatus::InvalidOperation),
            7 => Ok(PacketStatus::InvalidDataSize),
            _ => Err(value),
        }
    }
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketStatus::Ok => write!(f, "ok"),
            PacketStatus::TooMuchData => write!(f, "too much data"),
            PacketStatus::ClientEvicted => write!(f, "client evicted"),
            PacketStatus::ClientReleaseTooLow => write!(f, "client release too low"),
            PacketStatus::ClientReleaseTooHigh => write!(f, "client release too high"),
            PacketStatus::ClientShutdown => write!(f, "client shutdown"),
            PacketStatus::InvalidOperation => write!(f, "invalid operation"),
            PacketStatus::InvalidDataSize => write!(f, "invalid data size"),
        }
    }
}
