//! Fixed-capacity packet pool.
//!
//! Each slot follows `Idle -> Acquired -> Sent -> Completed -> Released -> Idle`.
//! Releasing a slot bumps its generation so that a [`PacketId`] handed out
//! before the release can never address the slot's next occupant.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{ClientError, Result};

/// Identifies one use of a pool slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PacketId {
    index: u32,
    generation: u32,
}

impl PacketId {
    /// Slot index inside the pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of times the slot had been released when this id was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Lifecycle state of a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketState {
    /// Free, owned by the pool.
    Idle,
    /// Owned by a caller, not yet sent.
    Acquired,
    /// Written to the session, awaiting a reply.
    Sent,
    /// Reply (or cancellation) delivered.
    Completed,
    /// Returned to the pool.
    Released,
}

impl fmt::Display for PacketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketState::Idle => write!(f, "idle"),
            PacketState::Acquired => write!(f, "acquired"),
            PacketState::Sent => write!(f, "sent"),
            PacketState::Completed => write!(f, "completed"),
            PacketState::Released => write!(f, "released"),
        }
    }
}

struct Slot {
    state: PacketState,
    generation: u32,
}

struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Slots {
    /// Resolve an id to its slot, treating stale ids as released.
    fn get_mut(&mut self, id: PacketId) -> Result<&mut Slot> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => Ok(slot),
            _ => Err(ClientError::InvalidPacketState {
                packet: id,
                state: PacketState::Released,
            }),
        }
    }
}

/// Pool of packets shared by every caller of one client.
pub(crate) struct PacketPool {
    inner: Mutex<Slots>,
    capacity: u32,
}

impl PacketPool {
    /// Create a pool with `capacity` idle packets.
    pub fn new(capacity: u32) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                state: PacketState::Idle,
                generation: 0,
            })
            .collect();
        // Reversed so that `pop` hands out low indices first.
        let free = (0..capacity).rev().collect();

        Self {
            inner: Mutex::new(Slots { slots, free }),
            capacity,
        }
    }

    /// Total number of packets.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of idle packets.
    pub fn available(&self) -> u32 {
        self.inner.lock().free.len() as u32
    }

    /// Take an idle packet. Never waits.
    pub fn acquire(&self) -> Result<PacketId> {
        let mut inner = self.inner.lock();
        let index = inner.free.pop().ok_or(ClientError::PoolExhausted)?;
        let slot = &mut inner.slots[index as usize];
        debug_assert_eq!(slot.state, PacketState::Idle);
        slot.state = PacketState::Acquired;
        Ok(PacketId {
            index,
            generation: slot.generation,
        })
    }

    /// `Acquired -> Sent`.
    pub fn mark_sent(&self, id: PacketId) -> Result<()> {
        self.transition(id, PacketState::Acquired, PacketState::Sent)
    }

    /// `Sent -> Completed`.
    pub fn complete(&self, id: PacketId) -> Result<()> {
        self.transition(id, PacketState::Sent, PacketState::Completed)
    }

    /// `Acquired | Completed -> Released -> Idle`.
    ///
    /// A packet that was never sent may be released directly. A sent packet
    /// must complete first; releasing it twice fails.
    pub fn release(&self, id: PacketId) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner.get_mut(id)?;
        match slot.state {
            PacketState::Acquired | PacketState::Completed => {
                slot.state = PacketState::Idle;
                slot.generation = slot.generation.wrapping_add(1);
                inner.free.push(id.index);
                Ok(())
            }
            state => Err(ClientError::InvalidPacketState { packet: id, state }),
        }
    }

    /// Current state of the packet `id` names.
    ///
    /// Returns [`PacketState::Released`] once the slot has moved on.
    pub fn state(&self, id: PacketId) -> PacketState {
        let mut inner = self.inner.lock();
        match inner.get_mut(id) {
            Ok(slot) => slot.state,
            Err(_) => PacketState::Released,
        }
    }

    fn transition(&self, id: PacketId, from: PacketState, to: PacketState) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner.get_mut(id)?;
        if slot.state != from {
            return Err(ClientError::InvalidPacketState {
                packet: id,
                state: slot.state,
            });
        }
        slot.state = to;
        Ok(())
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
