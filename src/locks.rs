//! Spin strategies for the region lock byte.
//!
//! The lock byte at offset 0 of the region is a binary mutex shared by every participant: `0`
//! means free, `1` means held. Every access to the bitmaps, the payload length and the payload
//! happens between an acquire and the matching release.
//!
//! # Safety
//! A participant which dies while holding the lock leaves it held forever. With the default
//! [`BusySpin`] strategy every other participant then spins indefinitely. [`SpinTimeout`] turns
//! this into a [`BridgeError::LockTimeout`] instead, but never takes the lock over.
//!
//! Note: all participants of a region must agree on the lock byte protocol. Mixing strategies
//! is fine, they only differ in how long a waiter is willing to spin.

use std::hint;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::bridge::BridgeError;

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;

/// Spins between two deadline checks in [`SpinTimeout`]
const SPINS_PER_CHECK: u32 = 1024;

/// The spin strategy decides how a participant waits for the region lock.
///
/// Note: the implementations are sealed to avoid committing to a specific lock interface.
#[allow(private_bounds)]
pub trait SpinStrategy: SpinStrategySealed {}

/// Sealed trait
pub(crate) trait SpinStrategySealed {
    /// Wait until `lock` is free and take it.
    fn acquire(lock: &AtomicU8) -> Result<(), BridgeError>;
}

/// Try to take the lock once
#[inline]
pub(crate) fn try_acquire(lock: &AtomicU8) -> bool {
    lock.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
}

/// Give the lock back
#[inline]
pub(crate) fn release(lock: &AtomicU8) {
    lock.store(UNLOCKED, Ordering::Release);
}

/// Busy-wait without backoff or timeout.
pub struct BusySpin;

impl SpinStrategySealed for BusySpin {
    #[inline]
    fn acquire(lock: &AtomicU8) -> Result<(), BridgeError> {
        while !try_acquire(lock) {
            // wait on a plain load so waiters don't keep stealing the cache line
            while lock.load(Ordering::Relaxed) != UNLOCKED {
                hint::spin_loop();
            }
        }
        Ok(())
    }
}

impl SpinStrategy for BusySpin {}

/// Busy-wait for at most `TIMEOUT_NS` nanoseconds (default 1s), then fail with
/// [`BridgeError::LockTimeout`].
pub struct SpinTimeout<const TIMEOUT_NS: u64 = 1_000_000_000>;

impl<const TIMEOUT_NS: u64> SpinStrategySealed for SpinTimeout<TIMEOUT_NS> {
    fn acquire(lock: &AtomicU8) -> Result<(), BridgeError> {
        let started_at = Instant::now();
        let timeout = Duration::from_nanos(TIMEOUT_NS);
        let mut spins = 0u32;

        while !try_acquire(lock) {
            while lock.load(Ordering::Relaxed) != UNLOCKED {
                hint::spin_loop();
                spins = spins.wrapping_add(1);
                if spins % SPINS_PER_CHECK == 0 {
                    let waited = started_at.elapsed();
                    if waited > timeout {
                        tracing::warn!(?waited, "gave up waiting for region lock");
                        return Err(BridgeError::LockTimeout { waited });
                    }
                }
            }
        }
        Ok(())
    }
}

impl<const TIMEOUT_NS: u64> SpinStrategy for SpinTimeout<TIMEOUT_NS> {}
