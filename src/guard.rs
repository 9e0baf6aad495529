//! The `guard` module provides the only interface for touching the shared region fields.
//!
//! A [`RegionGuard`] exists only while the region lock byte is held by this participant, so every
//! bitmap, length and payload access below happens inside the critical section. The lock is
//! released when the guard goes out of scope, including on early returns and errors.

use std::io;
use std::sync::atomic::Ordering;

use crate::bridge::BridgeError;
use crate::bridge::BridgeError::*;
use crate::layout::{payload_capacity, Slot, LENGTH_OFFSET, LENGTH_SIZE, LOCK_OFFSET, PAYLOAD_OFFSET};
use crate::locks;
use crate::region::Region;

/// An RAII implementation of a “scoped lock” of a `Region`
pub(crate) struct RegionGuard<'a> {
    region: &'a mut Region,
}

impl<'a> RegionGuard<'a> {
    /// Wraps a region whose lock byte was just acquired
    #[inline]
    pub(crate) fn new(region: &'a mut Region) -> Self {
        RegionGuard { region }
    }

    pub(crate) fn is_registered(&self, slot: Slot) -> bool {
        self.region
            .flag(slot.registration_offset())
            .load(Ordering::Relaxed)
            != 0
    }

    pub(crate) fn set_registered(&self, slot: Slot, registered: bool) {
        self.region
            .flag(slot.registration_offset())
            .store(registered as u8, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self, slot: Slot) -> bool {
        self.region.flag(slot.dirty_offset()).load(Ordering::Relaxed) != 0
    }

    pub(crate) fn set_dirty(&self, slot: Slot, dirty: bool) {
        self.region
            .flag(slot.dirty_offset())
            .store(dirty as u8, Ordering::Release);
    }

    /// Iterate over registered slots in ascending order
    pub(crate) fn registered(&self) -> impl Iterator<Item = Slot> + '_ {
        let region: &Region = &*self.region;
        Slot::all().filter(move |slot| {
            region
                .flag(slot.registration_offset())
                .load(Ordering::Relaxed)
                != 0
        })
    }

    /// Flag every registered slot except `writer` as having an unread update
    pub(crate) fn mark_dirty_except(&self, writer: Slot) -> usize {
        let mut marked = 0;
        for slot in self.registered().filter(|slot| *slot != writer) {
            self.set_dirty(slot, true);
            marked += 1;
        }
        marked
    }

    /// Number of payload bytes this region can hold
    #[inline]
    pub(crate) fn payload_capacity(&self) -> usize {
        payload_capacity(self.region.capacity())
    }

    /// Stored payload length, as written by the last writer
    pub(crate) fn payload_len(&self) -> usize {
        let bytes = &self.region.bytes()[LENGTH_OFFSET..LENGTH_OFFSET + LENGTH_SIZE];
        let mut len = [0u8; LENGTH_SIZE];
        len.copy_from_slice(bytes);
        u32::from_le_bytes(len) as usize
    }

    /// Stored payload bytes.
    ///
    /// A stored length beyond the payload capacity is never produced by a writer of this
    /// crate and is reported as `DecodeError` instead of reading past the region.
    pub(crate) fn payload(&self) -> Result<&[u8], BridgeError> {
        let len = self.payload_len();
        if len > self.payload_capacity() {
            return Err(DecodeError);
        }
        Ok(&self.region.bytes()[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len])
    }

    /// Replace stored length and payload with `data`.
    ///
    /// Nothing is modified when `data` does not fit.
    pub(crate) fn store_payload(&mut self, data: &[u8]) -> Result<usize, BridgeError> {
        let available = self.payload_capacity();
        let len = match u32::try_from(data.len()) {
            Ok(len) if data.len() <= available => len,
            _ => {
                return Err(PayloadTooLarge {
                    size: data.len(),
                    available,
                })
            }
        };

        let bytes = self.region.bytes_mut();
        bytes[LENGTH_OFFSET..LENGTH_OFFSET + LENGTH_SIZE].copy_from_slice(&len.to_le_bytes());
        bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + data.len()].copy_from_slice(data);

        Ok(data.len())
    }

    /// Whether the region path still links to the locked file
    #[inline]
    pub(crate) fn is_linked(&self) -> io::Result<bool> {
        self.region.is_linked()
    }

    /// Remove the region file while still holding the lock
    #[inline]
    pub(crate) fn unlink(&self) -> io::Result<()> {
        self.region.unlink()
    }
}

impl Drop for RegionGuard<'_> {
    /// Releases the region lock when `RegionGuard` goes out of scope
    fn drop(&mut self) {
        locks::release(self.region.flag(LOCK_OFFSET));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::layout::DEFAULT_CAPACITY;
    use crate::locks::BusySpin;
    use std::fs;
    use std::path::Path;

    fn region(path: &str) -> Region {
        fs::remove_file(path).unwrap_or_default();
        Region::open_or_create(Path::new(path), DEFAULT_CAPACITY).unwrap()
    }

    #[test]
    fn mark_dirty_skips_writer_and_free_slots() {
        let mut region = region("/tmp/guard_mark_dirty_test");
        let guard = region.lock::<BusySpin>().unwrap();

        let slots: Vec<Slot> = [0, 1, 5].iter().map(|i| Slot::new(*i).unwrap()).collect();
        for slot in &slots {
            guard.set_registered(*slot, true);
        }

        assert_eq!(guard.mark_dirty_except(slots[1]), 2);
        assert!(guard.is_dirty(slots[0]));
        assert!(!guard.is_dirty(slots[1]));
        assert!(guard.is_dirty(slots[2]));
        assert!(!guard.is_dirty(Slot::new(2).unwrap()));
        assert_eq!(guard.registered().collect::<Vec<_>>(), slots);

        drop(guard);
        fs::remove_file("/tmp/guard_mark_dirty_test").unwrap();
    }

    #[test]
    fn store_payload_rejects_oversized_data() {
        let mut region = region("/tmp/guard_oversized_test");
        let mut guard = region.lock::<BusySpin>().unwrap();

        assert_eq!(guard.store_payload(b"hello").unwrap(), 5);
        assert_eq!(guard.payload().unwrap(), b"hello");

        let available = DEFAULT_CAPACITY - PAYLOAD_OFFSET;
        let oversized = vec![7u8; available + 1];
        assert!(matches!(
            guard.store_payload(&oversized),
            Err(PayloadTooLarge { size, available: a }) if size == available + 1 && a == available
        ));
        assert_eq!(guard.payload_len(), 5);
        assert_eq!(guard.payload().unwrap(), b"hello");

        // exactly full payload fits
        let full = vec![9u8; available];
        assert_eq!(guard.store_payload(&full).unwrap(), available);
        assert_eq!(guard.payload().unwrap(), &full[..]);

        drop(guard);
        fs::remove_file("/tmp/guard_oversized_test").unwrap();
    }

    #[test]
    fn corrupted_length_is_decode_error() {
        let mut region = region("/tmp/guard_corrupted_length_test");
        region.bytes_mut()[LENGTH_OFFSET..LENGTH_OFFSET + LENGTH_SIZE]
            .copy_from_slice(&u32::MAX.to_le_bytes());

        let guard = region.lock::<BusySpin>().unwrap();
        assert!(matches!(guard.payload(), Err(DecodeError)));

        drop(guard);
        fs::remove_file("/tmp/guard_corrupted_length_test").unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let mut region = region("/tmp/guard_drop_test");
        {
            let _guard = region.lock::<BusySpin>().unwrap();
        }
        assert_eq!(region.flag(LOCK_OFFSET).load(Ordering::SeqCst), 0);
        assert!(locks::try_acquire(region.flag(LOCK_OFFSET)));

        fs::remove_file("/tmp/guard_drop_test").unwrap();
    }
}
