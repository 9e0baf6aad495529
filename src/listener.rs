//! Change notification.
//!
//! Every participant runs one listener thread polling its own dirty flag. The flag is peeked
//! without taking the region lock; only when it is set does the thread lock the region, copy
//! the payload out, clear the flag and hand the decoded value to the [`Listener`].
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytecheck::CheckBytes;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, Deserialize, Infallible};

use crate::bridge::BridgeError;
use crate::codec;
use crate::layout::Slot;
use crate::locks::SpinStrategy;
use crate::region::Region;

/// Receives the values written by other participants.
///
/// Callbacks run on the participant's listener thread and delay further polling while they
/// execute, so they must not block indefinitely.
pub trait Listener<T>: Send + 'static {
    /// Called once per consumed update with the decoded latest value
    fn on_change(&mut self, value: T);

    /// Called when an update could not be consumed, polling continues afterwards
    fn on_error(&mut self, error: BridgeError) {
        tracing::warn!(%error, "failed to consume update");
    }
}

impl<T, F> Listener<T> for F
where
    F: FnMut(T) + Send + 'static,
{
    #[inline]
    fn on_change(&mut self, value: T) {
        self(value)
    }
}

/// Listener discarding every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ignore;

impl<T> Listener<T> for Ignore {
    #[inline]
    fn on_change(&mut self, _value: T) {}
}

/// Handle of a running listener thread
pub(crate) struct ListenerHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ListenerHandle {
    /// Start polling `slot` of `region` every `poll_interval`
    pub(crate) fn spawn<T, S, L>(
        region: Region,
        slot: Slot,
        poll_interval: Duration,
        listener: L,
    ) -> Result<ListenerHandle, BridgeError>
    where
        T: Archive + 'static,
        T::Archived: for<'b> CheckBytes<DefaultValidator<'b>> + Deserialize<T, Infallible>,
        S: SpinStrategy + 'static,
        L: Listener<T>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let poller = Poller::<T, S, L> {
            region,
            slot,
            poll_interval,
            listener,
            running: running.clone(),
            _marker: PhantomData,
        };

        let thread = thread::Builder::new()
            .name(format!("mmap-bridge-{}", slot.index()))
            .spawn(move || poller.run())
            .map_err(BridgeError::ListenerSpawn)?;

        Ok(ListenerHandle { running, thread })
    }

    /// Ask the thread to stop and wait until it did
    pub(crate) fn stop(self) -> Result<(), BridgeError> {
        self.running.store(false, Ordering::Release);
        self.thread.thread().unpark();
        self.thread
            .join()
            .map_err(|_| BridgeError::ListenerPanicked)
    }
}

struct Poller<T, S, L> {
    /// Mapping held for the whole life of the listener
    region: Region,
    slot: Slot,
    poll_interval: Duration,
    listener: L,
    running: Arc<AtomicBool>,
    _marker: PhantomData<fn() -> (T, S)>,
}

impl<T, S, L> Poller<T, S, L>
where
    T: Archive,
    T::Archived: for<'b> CheckBytes<DefaultValidator<'b>> + Deserialize<T, Infallible>,
    S: SpinStrategy,
    L: Listener<T>,
{
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            if self.region.is_dirty(self.slot) {
                match self.consume() {
                    Ok(value) => self.listener.on_change(value),
                    Err(err) => self.listener.on_error(err),
                }
            }
            // woken up early by `ListenerHandle::stop`
            thread::park_timeout(self.poll_interval);
        }
    }

    /// Take the latest payload and clear this participant's dirty flag
    fn consume(&mut self) -> Result<T, BridgeError> {
        let slot = self.slot;
        let data = {
            let guard = self.region.lock::<S>()?;
            // flag is cleared even for undecodable bytes, a retry would fail the same way
            guard.set_dirty(slot, false);
            let payload = guard.payload()?;
            codec::aligned_copy(payload)
        };

        tracing::trace!(slot = slot.index(), len = data.len(), "consumed update");
        codec::decode(&data)
    }
}
