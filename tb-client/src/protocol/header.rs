//! Message header (128 bytes).
//!
//! The header is the fixed-size prefix of every message exchanged with the
//! ledger service. It carries both checksums, routing information, the
//! correlation id and the element count of the body.
//!
//! ```text
//! offset size field
//!      0   16 checksum        Aegis128L MAC of bytes 16..128
//!     16   16 checksum_body   Aegis128L MAC of the body
//!     32   16 cluster
//!     48   16 client
//!     64    8 correlation
//!     72    4 size            header + body
//!     76    4 count           elements in the body
//!     80    2 version
//!     82    1 command
//!     83    1 operation
//!     84    1 status
//!     85   43 reserved        must be zero
//! ```

use aegis::aegis128l::Aegis128L;
use zerocopy::byteorder::little_endian::{U128, U16, U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::operation::{Command, Operation, PacketStatus};
use crate::error::ProtocolError;

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: u16 = 1;

/// Size of the message header in bytes.
pub const HEADER_SIZE: u32 = 128;

const HEADER_SIZE_USIZE: usize = HEADER_SIZE as usize;

/// Zero key used for checksums.
const ZERO_KEY: [u8; 16] = [0u8; 16];

/// Zero nonce used for checksums.
const ZERO_NONCE: [u8; 16] = [0u8; 16];

/// Compute the checksum of `data`.
///
/// Aegis128L in MAC mode: the data is passed as associated data with an
/// empty message and the authentication tag is the checksum.
pub fn checksum(data: &[u8]) -> u128 {
    let cipher = Aegis128L::<16>::new(&ZERO_KEY, &ZERO_NONCE);
    let (_, tag) = cipher.encrypt(&[], data);
    u128::from_le_bytes(tag)
}

/// Wire header, little-endian, alignment 1 (no implicit padding).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Header {
    /// Checksum covering bytes 16..128 of this header.
    pub checksum: U128,
    /// Checksum covering the message body.
    pub checksum_body: U128,
    /// Cluster identifier.
    pub cluster: U128,
    /// Client identifier.
    pub client: U128,
    /// Correlation identifier linking a reply to its request.
    pub correlation: U64,
    /// Total message size (header + body).
    pub size: U32,
    /// Number of elements in the body.
    pub count: U32,
    /// Protocol version.
    pub version: U16,
    /// Command type.
    pub command: u8,
    /// Operation.
    pub operation: u8,
    /// Reply status (zero in requests).
    pub status: u8,
    /// Reserved (must be zero).
    pub reserved: [u8; 43],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE_USIZE);

impl Default for Header {
    fn default() -> Self {
        let mut header = Header::new_zeroed();
        header.size = U32::new(HEADER_SIZE);
        header.version = U16::new(PROTOCOL_VERSION);
        header
    }
}

impl Header {
    /// Create a new header for the given cluster and client.
    pub fn new(cluster: u128, client: u128) -> Self {
        let mut header = Self::default();
        header.cluster = U128::new(cluster);
        header.client = U128::new(client);
        header
    }

    /// Parse a header from its wire bytes.
    ///
    /// Only the layout is checked here; call [`Header::validate`] and the
    /// checksum helpers before trusting the contents.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE_USIZE]) -> Result<Header, ProtocolError> {
        Header::read_from_bytes(bytes).map_err(|_| ProtocolError::InvalidHeader)
    }

    /// Get the command type.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    /// Set the command type.
    pub fn set_command(&mut self, command: Command) {
        self.command = command as u8;
    }

    /// Get the operation.
    pub fn operation(&self) -> Option<Operation> {
        Operation::try_from(self.operation).ok()
    }

    /// Set the operation.
    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation as u8;
    }

    /// Get the reply status.
    pub fn status(&self) -> Option<PacketStatus> {
        PacketStatus::try_from(self.status).ok()
    }

    /// Set the reply status.
    pub fn set_status(&mut self, status: PacketStatus) {
        self.status = status as u8;
    }

    /// Calculate the header checksum (covers bytes 16..128).
    pub fn calculate_checksum(&self) -> u128 {
        checksum(&self.as_bytes()[16..])
    }

    /// Set the header checksum (must be called after `set_checksum_body`).
    pub fn set_checksum(&mut self) {
        self.checksum = U128::new(self.calculate_checksum());
    }

    /// Set the body checksum.
    pub fn set_checksum_body(&mut self, body: &[u8]) {
        self.checksum_body = U128::new(checksum(body));
    }

    /// Verify the header checksum is valid.
    pub fn valid_checksum(&self) -> bool {
        self.checksum.get() == self.calculate_checksum()
    }

    /// Verify the body checksum is valid.
    pub fn valid_checksum_body(&self, body: &[u8]) -> bool {
        self.checksum_body.get() == checksum(body)
    }

    /// Body size announced by this header.
    pub fn body_size(&self) -> u32 {
        self.size.get().saturating_sub(HEADER_SIZE)
    }

    /// Validate the header structure.
    ///
    /// Neither the protocol version nor the operation is checked here: a
    /// reply carrying either is still routable and fails only its own packet.
    pub fn validate(&self, size_max: u32) -> Result<(), ProtocolError> {
        if self.reserved != [0; 43] {
            return Err(ProtocolError::InvalidHeader);
        }
        let size = self.size.get();
        if size < HEADER_SIZE || size > size_max {
            return Err(ProtocolError::InvalidSize);
        }
        if self.command().is_none() {
            return Err(ProtocolError::InvalidCommand);
        }
        Ok(())
    }
}
