//! Internal implementation details.
//!
//! This module contains the packet pool, connection framing and the session
//! event loop. These are implementation details and not part of the public API.

pub(crate) mod connection;
pub(crate) mod pool;
pub(crate) mod session;
