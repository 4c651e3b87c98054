//! Batched client core for a TigerBeetle-style ledger service.
//!
//! The client encodes typed account records into fixed-layout wire
//! messages, tracks in-flight requests against a bounded pool of reusable
//! packets, and delivers each completion exactly once.
//!
//! # Features
//!
//! - **Batched**: one packet carries up to [`Client::max_batch_count`] records
//! - **Bounded**: at most [`Client::packet_capacity`] requests in flight, never blocking
//! - **Shareable**: `Client<C>` is `Send + Sync`; submit from any thread or executor
//! - **Resilient**: the session reconnects with backoff and re-registers
//!
//! # Quick Start
//!
//! ```ignore
//! use tb_client::{Account, Client, Config, Transfer};
//!
//! let client: Client = Client::builder()
//!     .cluster(0)
//!     .address("127.0.0.1:3000")?
//!     .config(Config::default())
//!     .build()
//!     .await?;
//!
//! // Create an account
//! let account = Account {
//!     id: tb_client::id(),
//!     ledger: 1,
//!     code: 1,
//!     ..Default::default()
//! };
//! let results = client.create_accounts(&[account]).await?;
//! assert!(results[0].is_ok());
//!
//! // Lookup the account
//! let accounts = client.lookup_accounts(&[account.id]).await?;
//! println!("Found {} accounts", accounts.len());
//!
//! // Move funds between two accounts
//! let transfer = Transfer {
//!     id: tb_client::id(),
//!     debit_account_id: account.id,
//!     credit_account_id: other.id,
//!     amount: 100,
//!     ledger: 1,
//!     code: 1,
//!     ..Default::default()
//! };
//! let results = client.create_transfers(&[transfer]).await?;
//! assert!(results[0].is_ok());
//!
//! client.close().await;
//! ```
//!
//! # Manual pipelining
//!
//! ```ignore
//! let packet = client.acquire_packet(&batch, "batch-7")?;
//! let completion = client.submit_packet(packet)?;
//! let event = completion.await?;
//! assert_eq!(event.context, "batch-7");
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

// Public modules
mod client;
mod config;
mod error;
mod packet;
pub mod protocol;

// Internal implementation (not public)
mod internal;

// Re-export main types
pub use client::{Client, ClientBuilder};
pub use config::{Config, PACKETS_MAX};
pub use error::{CancelReason, ClientError, InitError, ProtocolError, Result, ValidationError};
pub use internal::pool::{PacketId, PacketState};
pub use internal::session::SessionState;
pub use packet::{Completion, CompletionEvent, Packet};

// Re-export protocol types
pub use protocol::{
    Account, AccountResult, CreateAccountResult, CreateTransferResult, PacketStatus, Transfer,
    TransferResult,
};

/// Generate a unique account ID.
///
/// Creates a globally unique identifier from the current time and random
/// data. IDs generated later sort higher (at millisecond resolution or
/// better).
///
/// # Example
///
/// ```
/// let a = tb_client::id();
/// let b = tb_client::id();
/// assert_ne!(a, b);
/// ```
pub fn id() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0);

    let random: u64 = rand::random();

    ((timestamp as u128) << 64) | (random as u128)
}
