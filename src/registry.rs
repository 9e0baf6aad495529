//! Slot registry: joining and leaving a region.
//!
//! Joining picks the lowest free slot of the registration bitmap. Leaving clears the slot and,
//! when it was the last registered one, removes the backing file while still holding the lock,
//! so a participant joining concurrently either registers before the check or notices that the
//! file it locked is no longer linked and starts over with a fresh region.
use std::io;
use std::path::Path;

use crate::bridge::BridgeError;
use crate::bridge::BridgeError::*;
use crate::guard::RegionGuard;
use crate::layout::Slot;
use crate::locks::SpinStrategy;
use crate::region::Region;

/// Claim the first free slot
pub(crate) fn allocate(guard: &RegionGuard<'_>) -> Result<Slot, BridgeError> {
    let slot = Slot::all()
        .find(|slot| !guard.is_registered(*slot))
        .ok_or(RegistryFull)?;

    guard.set_registered(slot, true);
    guard.set_dirty(slot, false);

    Ok(slot)
}

/// Free `slot`, returns whether any other slot is still registered
pub(crate) fn deallocate(guard: &RegionGuard<'_>, slot: Slot) -> bool {
    guard.set_registered(slot, false);
    guard.set_dirty(slot, false);

    guard.registered().next().is_some()
}

/// Open or create the region at `path` and allocate a slot in it.
///
/// A region that disappears while joining is recreated and the whole join retried once.
pub(crate) fn join<S: SpinStrategy>(
    path: &Path,
    capacity: usize,
) -> Result<(Region, Slot), BridgeError> {
    match try_join::<S>(path, capacity) {
        Err(RegionUnavailable(err)) => {
            tracing::debug!(path = %path.display(), %err, "region unavailable while joining, retrying");
            try_join::<S>(path, capacity)
        }
        res => res,
    }
}

fn try_join<S: SpinStrategy>(path: &Path, capacity: usize) -> Result<(Region, Slot), BridgeError> {
    let mut region = Region::open_or_create(path, capacity)?;

    let slot = {
        let guard = region.lock::<S>()?;

        // the last participant may have removed the file between our open and lock
        if !guard.is_linked().map_err(RegionUnavailable)? {
            return Err(RegionUnavailable(io::Error::new(
                io::ErrorKind::NotFound,
                "region was removed while joining",
            )));
        }

        allocate(&guard)?
    };

    tracing::debug!(
        path = %path.display(),
        slot = slot.index(),
        pid = %nix::unistd::getpid(),
        "joined region"
    );

    Ok((region, slot))
}

/// Release `slot` of the region at `path`, removing the region when no participant is left.
///
/// Returns whether the region file was removed. A region which is already gone, or which cannot
/// be removed, is logged and not treated as an error.
pub(crate) fn leave<S: SpinStrategy>(path: &Path, slot: Slot) -> Result<bool, BridgeError> {
    let mut region = match Region::open(path) {
        Ok(region) => region,
        Err(RegionUnavailable(err)) if err.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), slot = slot.index(), "region already removed");
            return Ok(false);
        }
        Err(err) => return Err(err),
    };

    let guard = region.lock::<S>()?;
    if deallocate(&guard, slot) {
        tracing::debug!(path = %path.display(), slot = slot.index(), "left region");
        return Ok(false);
    }

    // only remove the file we actually locked, never a successor created at the same path
    let removed = guard.is_linked().and_then(|linked| match linked {
        true => guard.unlink().map(|_| true),
        false => Ok(false),
    });

    match removed {
        Ok(removed) => {
            tracing::debug!(path = %path.display(), slot = slot.index(), removed, "last participant left region");
            Ok(removed)
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to remove region");
            Ok(false)
        }
    }
}
