//! The `bridge` module is the core component of the `mmap-bridge` library, providing a `Bridge`
//! struct through which independent processes share a single evolving value.
//!
//! Every `Bridge` is a participant of the region stored at a given path: constructing one joins
//! the region (creating it when absent) and starts a listener thread, `write` replaces the shared
//! value and flags every other participant, and `close` (or dropping the bridge) leaves the region,
//! removing its file when the last participant is gone.
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytecheck::CheckBytes;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, Deserialize, Infallible, Serialize};
use thiserror::Error;

use crate::bridge::BridgeError::*;
use crate::codec;
use crate::layout::{self, Slot, DEFAULT_CAPACITY};
use crate::listener::{Ignore, Listener, ListenerHandle};
use crate::locks::{BusySpin, SpinStrategy};
use crate::region::Region;
use crate::registry;

/// Default interval between two checks of the participant's dirty flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// `Bridge` is a participant handle into a shared region broadcasting a single value of type `T`.
///
/// Template parameters:
///   - `T` - shared value type, stored as an `rkyv` archive
///   - `S` - spin strategy used for the region lock (default [`BusySpin`])
///   - `N` - serializer scratch space size
pub struct Bridge<T, S: SpinStrategy = BusySpin, const N: usize = 1024> {
    /// Region file path
    path: PathBuf,
    /// Slot owned by this participant, `None` once closed
    slot: Option<Slot>,
    /// Background thread consuming updates for `slot`
    listener: Option<ListenerHandle>,
    /// Re-usable buffer for serialization
    serialize_buffer: Option<AlignedVec>,
    _marker: PhantomData<fn() -> (T, S)>,
}

/// `BridgeError` enumerates all possible errors returned by this library.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The region file could not be opened, mapped or created.
    #[error("region unavailable: {0}")]
    RegionUnavailable(std::io::Error),
    /// The region file is too small to hold the region header.
    #[error("invalid region of {len} bytes")]
    InvalidRegion { len: u64 },
    /// The requested region capacity leaves no room for a payload.
    #[error("invalid region capacity {capacity}")]
    InvalidCapacity { capacity: usize },
    /// Every slot of the region is taken.
    #[error("no free participant slot")]
    RegistryFull,
    /// The serialized value does not fit into the region.
    #[error("payload of {size} bytes exceeds {available} available bytes")]
    PayloadTooLarge { size: usize, available: usize },
    /// An error occurred while serializing an entity.
    #[error("error writing entity")]
    FailedEntityWrite,
    /// The stored payload is not a valid archive of the expected type.
    #[error("error decoding payload")]
    DecodeError,
    /// The participant is closed or its slot is no longer registered.
    #[error("participant not registered")]
    NotRegistered,
    /// The region lock could not be acquired in time.
    #[error("region lock not acquired after {waited:?}")]
    LockTimeout { waited: Duration },
    /// The listener thread could not be started.
    #[error("error spawning listener thread: {0}")]
    ListenerSpawn(std::io::Error),
    /// The listener thread panicked.
    #[error("listener thread panicked")]
    ListenerPanicked,
}

/// Runtime parameters of a [`Bridge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Size of a newly created region file in bytes, an existing file keeps its size
    pub capacity: usize,
    /// Interval between two checks of this participant's dirty flag
    pub poll_interval: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            capacity: DEFAULT_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl BridgeOptions {
    /// Set region capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set listener poll interval
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl<T> Bridge<T>
where
    T: Archive + Serialize<AllocSerializer<1024>> + 'static,
    T::Archived: for<'b> CheckBytes<DefaultValidator<'b>> + Deserialize<T, Infallible>,
{
    /// Join the region at `path` with default options, ignoring updates of other participants
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        Self::with_params(path, BridgeOptions::default(), Ignore)
    }

    /// Join the region at `path` with default options, calling `on_change` with every update
    pub fn with_listener<L: Listener<T>>(
        path: impl AsRef<Path>,
        on_change: L,
    ) -> Result<Self, BridgeError> {
        Self::with_params(path, BridgeOptions::default(), on_change)
    }
}

impl<T, S, const N: usize> Bridge<T, S, N>
where
    T: Archive + Serialize<AllocSerializer<N>> + 'static,
    T::Archived: for<'b> CheckBytes<DefaultValidator<'b>> + Deserialize<T, Infallible>,
    S: SpinStrategy + 'static,
{
    /// Join the region at `path` using given `options` and template parameters.
    ///
    /// Creates the region when absent, allocates a slot and starts the listener thread which
    /// calls `listener` for every value written by another participant.
    pub fn with_params<L: Listener<T>>(
        path: impl AsRef<Path>,
        options: BridgeOptions,
        listener: L,
    ) -> Result<Self, BridgeError> {
        layout::validate_capacity(options.capacity)?;
        let path = path.as_ref().to_path_buf();

        let (region, slot) = registry::join::<S>(&path, options.capacity)?;

        let listener =
            match ListenerHandle::spawn::<T, S, L>(region, slot, options.poll_interval, listener) {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = registry::leave::<S>(&path, slot);
                    return Err(err);
                }
            };

        Ok(Bridge {
            path,
            slot: Some(slot),
            listener: Some(listener),
            serialize_buffer: Some(AlignedVec::new()),
            _marker: PhantomData,
        })
    }

    /// Replace the shared value with `entity` and flag every other participant.
    ///
    /// Returns the number of payload bytes written. A value that does not fit fails with
    /// `PayloadTooLarge` before anything in the region is modified.
    pub fn write(&mut self, entity: &T) -> Result<usize, BridgeError> {
        let slot = self.slot.ok_or(NotRegistered)?;

        // serialize given entity into bytes
        let buf = self.serialize_buffer.take().unwrap_or_else(AlignedVec::new);
        let data = codec::encode::<T, N>(entity, buf)?;

        let res = self.write_bytes(slot, &data);

        // Restore buffer for potential reuse
        self.serialize_buffer.replace(data);

        res
    }

    fn write_bytes(&self, slot: Slot, data: &[u8]) -> Result<usize, BridgeError> {
        let mut region = Region::open(&self.path)?;

        let available = layout::payload_capacity(region.capacity());
        if data.len() > available {
            return Err(PayloadTooLarge {
                size: data.len(),
                available,
            });
        }

        let mut guard = region.lock::<S>()?;
        if !guard.is_registered(slot) {
            return Err(NotRegistered);
        }

        let notified = guard.mark_dirty_except(slot);
        let size = guard.store_payload(data)?;
        drop(guard);

        tracing::trace!(slot = slot.index(), size, notified, "wrote payload");
        Ok(size)
    }

    /// Read and decode the current shared value without consuming this participant's update.
    ///
    /// Returns `None` while the stored payload is empty, which is the case before the first write
    /// and after writing a value whose archive is zero-sized (such as `()`).
    pub fn read(&self) -> Result<Option<T>, BridgeError> {
        self.slot.ok_or(NotRegistered)?;

        let mut region = Region::open(&self.path)?;
        let data = {
            let guard = region.lock::<S>()?;
            let payload = guard.payload()?;
            if payload.is_empty() {
                return Ok(None);
            }
            codec::aligned_copy(payload)
        };

        codec::decode(&data).map(Some)
    }

    /// Number of participants currently registered in the region
    pub fn participants(&self) -> Result<usize, BridgeError> {
        self.slot.ok_or(NotRegistered)?;

        let mut region = Region::open(&self.path)?;
        let guard = region.lock::<S>()?;
        let count = guard.registered().count();
        Ok(count)
    }
}

impl<T, S: SpinStrategy, const N: usize> Bridge<T, S, N> {
    /// Slot index owned by this participant, `None` once closed
    pub fn slot(&self) -> Option<usize> {
        self.slot.map(|slot| slot.index())
    }

    /// Region file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the region.
    ///
    /// Stops and joins the listener thread first, then frees this participant's slot and removes
    /// the region file if no other participant is registered. Calling `close` again after it
    /// succeeded is a no-op. When the slot could not be released, the participant stays
    /// registered without a listener and a later `close` (or drop) tries again.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        let Some(slot) = self.slot.take() else {
            return Ok(());
        };

        let stopped = match self.listener.take() {
            Some(listener) => listener.stop(),
            None => Ok(()),
        };

        // the slot is released even when the listener thread panicked
        let left = registry::leave::<S>(&self.path, slot);
        if left.is_err() {
            self.slot = Some(slot);
        }

        stopped?;
        left.map(|_| ())
    }
}

impl<T, S: SpinStrategy, const N: usize> Drop for Bridge<T, S, N> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(path = %self.path.display(), %err, "failed to leave region");
        }
    }
}
