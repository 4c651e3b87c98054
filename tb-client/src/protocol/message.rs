//! Message framing.
//!
//! Messages consist of a fixed 128-byte header followed by a variable-length body.

use zerocopy::byteorder::little_endian::{U128, U16, U32, U64};
use zerocopy::IntoBytes;

use super::header::{Header, HEADER_SIZE};
use super::operation::{Command, Operation, PacketStatus};
use crate::error::ProtocolError;

/// Maximum message size (1 MiB).
pub const MESSAGE_SIZE_MAX: u32 = 1024 * 1024;

/// Maximum body size.
pub const MESSAGE_BODY_SIZE_MAX: u32 = MESSAGE_SIZE_MAX - HEADER_SIZE;

/// A complete message with header and body.
#[derive(Clone, Debug)]
pub struct Message {
    header: Header,
    body: Vec<u8>,
}

impl Message {
    /// Create a message from a parsed header and its body.
    ///
    /// Fails with [`ProtocolError::InvalidSize`] if the header announces a
    /// different body length.
    pub fn from_parts(header: Header, body: Vec<u8>) -> Result<Self, ProtocolError> {
        if header.body_size() as usize != body.len() {
            return Err(ProtocolError::InvalidSize);
        }
        Ok(Self { header, body })
    }

    /// Get the header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Get the header mutably.
    ///
    /// Checksums must be recomputed with [`Message::finalize`] afterwards.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Get the body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the message and return its body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Replace the body and update the header size.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
        self.header.size = U32::new(HEADER_SIZE + self.body.len() as u32);
    }

    /// Get the total message size (header + body).
    pub fn len(&self) -> u32 {
        HEADER_SIZE + self.body.len() as u32
    }

    /// Check if the message has an empty body.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Correlation id carried in the header.
    pub fn correlation(&self) -> u64 {
        self.header.correlation.get()
    }

    /// Finalize the message by computing checksums.
    ///
    /// Must be called before sending the message.
    pub fn finalize(&mut self) {
        self.header.set_checksum_body(&self.body);
        self.header.set_checksum();
    }

    /// Validate the message checksums.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.header.valid_checksum() {
            return Err(ProtocolError::InvalidHeaderChecksum);
        }
        if !self.header.valid_checksum_body(&self.body) {
            return Err(ProtocolError::InvalidBodyChecksum);
        }
        Ok(())
    }

    /// Serialize the message into one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len() as usize);
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Builder for request and reply messages.
pub struct MessageBuilder {
    header: Header,
    body: Vec<u8>,
}

impl MessageBuilder {
    fn new(command: Command, cluster: u128, client: u128) -> Self {
        let mut header = Header::new(cluster, client);
        header.set_command(command);
        Self {
            header,
            body: Vec::new(),
        }
    }

    /// Start a request message.
    pub fn request(cluster: u128, client: u128) -> Self {
        Self::new(Command::Request, cluster, client)
    }

    /// Start a reply message.
    pub fn reply(cluster: u128, client: u128) -> Self {
        Self::new(Command::Reply, cluster, client)
    }

    /// Set the correlation id.
    pub fn correlation(mut self, correlation: u64) -> Self {
        self.header.correlation = U64::new(correlation);
        self
    }

    /// Set the operation.
    pub fn operation(mut self, operation: Operation) -> Self {
        self.header.set_operation(operation);
        self
    }

    /// Override the protocol version.
    pub fn version(mut self, version: u16) -> Self {
        self.header.version = U16::new(version);
        self
    }

    /// Set the reply status.
    pub fn status(mut self, status: PacketStatus) -> Self {
        self.header.set_status(status);
        self
    }

    /// Set the element count.
    pub fn count(mut self, count: u32) -> Self {
        self.header.count = U32::new(count);
        self
    }

    /// Set the body data.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Overwrite the cluster id.
    pub fn cluster(mut self, cluster: u128) -> Self {
        self.header.cluster = U128::new(cluster);
        self
    }

    /// Build and finalize the message.
    pub fn build(self) -> Message {
        let mut message = Message {
            header: self.header,
            body: Vec::new(),
        };
        message.set_body(self.body);
        message.finalize();
        message
    }
}
