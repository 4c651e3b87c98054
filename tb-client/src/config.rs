//! Client configuration and its negotiation with the server.

use zerocopy::byteorder::little_endian::{U32, U64};

use crate::error::InitError;
use crate::protocol::{
    RegisterBody, ACCOUNT_SIZE, HEADER_SIZE, MESSAGE_SIZE_MAX, PROTOCOL_VERSION, TRANSFER_SIZE,
};

/// Upper bound on the number of packets a single client may own.
pub const PACKETS_MAX: u32 = 4096;

/// Client configuration.
///
/// A zero field means "use the server's default". After [`Config::negotiate`]
/// every field is non-zero. The configuration is immutable once the client
/// has been created.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Config {
    /// Maximum message size in bytes (header + body).
    pub size: u32,
    /// Protocol version.
    pub version: u32,
    /// Maximum number of records in flight, credit side. Also bounds the packet pool.
    pub max_credits: u32,
    /// Maximum number of records in flight, debit side. Also bounds the packet pool.
    pub max_debits: u32,
    /// Maximum credit or debit total of a single account.
    pub max_balance: u64,
}

impl Config {
    /// Check the fields that are set.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.size != 0 && self.size < HEADER_SIZE + ACCOUNT_SIZE as u32 {
            return Err(InitError::InvalidConfig("size cannot hold a single record"));
        }
        if self.size > MESSAGE_SIZE_MAX {
            return Err(InitError::InvalidConfig("size exceeds the message size limit"));
        }
        if self.version > u16::MAX as u32 {
            return Err(InitError::InvalidConfig("version out of range"));
        }
        Ok(())
    }

    /// Merge this configuration with the defaults offered by the server.
    ///
    /// Zero fields take the server's value. Set limits are capped at the
    /// server's. A requested version must match the server's exactly and
    /// must be one this client speaks.
    pub fn negotiate(&self, server: &Config) -> Result<Config, InitError> {
        self.validate()?;

        let version = match (self.version, server.version) {
            (0, found) => found,
            (expected, found) if expected != found => {
                return Err(InitError::UnsupportedVersion { expected, found });
            }
            (expected, _) => expected,
        };
        if version != PROTOCOL_VERSION as u32 {
            return Err(InitError::UnsupportedVersion {
                expected: PROTOCOL_VERSION as u32,
                found: version,
            });
        }

        let negotiated = Config {
            size: limit(self.size, server.size).min(MESSAGE_SIZE_MAX),
            version,
            max_credits: limit(self.max_credits, server.max_credits),
            max_debits: limit(self.max_debits, server.max_debits),
            max_balance: limit(self.max_balance, server.max_balance),
        };

        if negotiated.size == 0
            || negotiated.max_credits == 0
            || negotiated.max_debits == 0
            || negotiated.max_balance == 0
        {
            return Err(InitError::InvalidConfig("server offered a zero limit"));
        }
        negotiated.validate()?;
        Ok(negotiated)
    }

    /// Number of packets in the pool.
    pub fn packet_count(&self) -> u32 {
        self.max_credits.min(self.max_debits).clamp(1, PACKETS_MAX)
    }

    /// Maximum number of accounts (or ids) in one batch.
    pub fn max_batch_count(&self) -> u32 {
        self.batch_limit(ACCOUNT_SIZE)
    }

    /// Maximum number of transfers in one batch.
    pub fn max_transfer_batch_count(&self) -> u32 {
        self.batch_limit(TRANSFER_SIZE)
    }

    fn batch_limit(&self, record_size: usize) -> u32 {
        let per_message = self.size.saturating_sub(HEADER_SIZE) / record_size as u32;
        self.max_credits.min(self.max_debits).min(per_message)
    }

    /// Protocol version as carried in message headers.
    pub(crate) fn wire_version(&self) -> u16 {
        self.version as u16
    }

    pub(crate) fn to_register_body(self) -> RegisterBody {
        RegisterBody {
            size: U32::new(self.size),
            version: U32::new(self.version),
            max_credits: U32::new(self.max_credits),
            max_debits: U32::new(self.max_debits),
            max_balance: U64::new(self.max_balance),
            reserved: [0; 8],
        }
    }
}

impl From<&RegisterBody> for Config {
    fn from(body: &RegisterBody) -> Self {
        Self {
            size: body.size.get(),
            version: body.version.get(),
            max_credits: body.max_credits.get(),
            max_debits: body.max_debits.get(),
            max_balance: body.max_balance.get(),
        }
    }
}

fn limit<T: Copy + Ord + Default>(requested: T, offered: T) -> T {
    if requested == T::default() {
        offered
    } else if offered == T::default() {
        requested
    } else {
        requested.min(offered)
    }
}
