//! Ledger wire protocol.
//!
//! This module contains the wire format types and the batch codec used to
//! talk to the ledger service.

pub mod codec;
pub mod header;
pub mod message;
pub mod operation;
pub mod types;

// Re-export commonly used items
pub use codec::{
    decode_accounts, decode_ids, decode_register, decode_results, decode_transfer_results,
    decode_transfers, encode_accounts, encode_ids, encode_results, encode_transfer_results,
    encode_transfers,
};
pub use header::{checksum, Header, HEADER_SIZE, PROTOCOL_VERSION};
pub use message::{Message, MessageBuilder, MESSAGE_BODY_SIZE_MAX, MESSAGE_SIZE_MAX};
pub use operation::{Command, Operation, PacketStatus, SESSION_OPERATIONS_RESERVED};
pub use types::{
    Account, AccountResult, CreateAccountResult, CreateTransferResult, RegisterBody, Transfer,
    TransferResult, ACCOUNT_RESULT_SIZE, ACCOUNT_SIZE, REGISTER_BODY_SIZE, TRANSFER_RESULT_SIZE,
    TRANSFER_SIZE,
};
