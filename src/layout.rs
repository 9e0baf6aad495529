//! Byte layout of the shared region.
//!
//! ```text
//! +------+---------------------+---------------------+------------+-----------------+
//! | lock | registration bitmap |    dirty bitmap     | length u32 |     payload     |
//! |  1B  |   SLOT_COUNT bytes  |   SLOT_COUNT bytes  |  4B (LE)   | capacity-header |
//! +------+---------------------+---------------------+------------+-----------------+
//! ```
use crate::bridge::BridgeError;
use crate::bridge::BridgeError::*;

/// Default size of the backing file in bytes
pub const DEFAULT_CAPACITY: usize = 4096;

/// Number of participant slots in the registration and dirty bitmaps
pub const SLOT_COUNT: usize = 256;

pub(crate) const LOCK_OFFSET: usize = 0;
pub(crate) const REGISTRATION_OFFSET: usize = LOCK_OFFSET + 1;
pub(crate) const DIRTY_OFFSET: usize = REGISTRATION_OFFSET + SLOT_COUNT;
pub(crate) const LENGTH_OFFSET: usize = DIRTY_OFFSET + SLOT_COUNT;
pub(crate) const LENGTH_SIZE: usize = 4;
pub(crate) const PAYLOAD_OFFSET: usize = LENGTH_OFFSET + LENGTH_SIZE;

/// Size of everything preceding the payload
pub const HEADER_SIZE: usize = PAYLOAD_OFFSET;

/// Number of payload bytes available in a region of `capacity` bytes
#[inline]
pub fn payload_capacity(capacity: usize) -> usize {
    capacity.saturating_sub(HEADER_SIZE)
}

/// Validate a requested region `capacity`: there must be room for at least one payload byte
/// and the payload length must be representable in the 4-byte length field.
pub(crate) fn validate_capacity(capacity: usize) -> Result<(), BridgeError> {
    let payload = payload_capacity(capacity);
    if payload == 0 || payload as u64 > u32::MAX as u64 {
        return Err(InvalidCapacity { capacity });
    }
    Ok(())
}

/// `Slot` is a participant's index into both bitmaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Slot(usize);

impl Slot {
    /// Create new `Slot`, returns `None` when `idx` is out of the bitmap range
    #[cfg(test)]
    pub(crate) fn new(idx: usize) -> Option<Slot> {
        (idx < SLOT_COUNT).then_some(Slot(idx))
    }

    /// Get slot index (0..SLOT_COUNT)
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0
    }

    /// Get offset of this slot's registration byte
    #[inline]
    pub(crate) fn registration_offset(&self) -> usize {
        REGISTRATION_OFFSET + self.0
    }

    /// Get offset of this slot's dirty byte
    #[inline]
    pub(crate) fn dirty_offset(&self) -> usize {
        DIRTY_OFFSET + self.0
    }

    /// Iterate over every slot in ascending order
    pub(crate) fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT).map(Slot)
    }
}
