use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};

use crate::bridge::BridgeError;
use crate::bridge::BridgeError::*;
use crate::guard::RegionGuard;
use crate::layout::{Slot, HEADER_SIZE, LOCK_OFFSET};
use crate::locks::SpinStrategy;

/// Region stores the memory mapped backing file shared by all participants.
///
/// Each `Region` owns its own mapping, so a participant may hold several of them at once
/// (one kept by the listener thread, short-lived ones for writes and departure).
pub(crate) struct Region {
    /// Backing file path
    path: PathBuf,
    /// Open backing file, kept to compare its identity with whatever `path` links to
    file: File,
    /// Modifiable memory mapped backing file
    mmap: MmapMut,
}

impl Region {
    /// Open and map an existing region file.
    pub(crate) fn open(path: &Path) -> Result<Region, BridgeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(RegionUnavailable)?;

        let len = file.metadata().map_err(RegionUnavailable)?.len();
        if len <= HEADER_SIZE as u64 {
            return Err(InvalidRegion { len });
        }

        let mmap = unsafe { MmapMut::map_mut(&file).map_err(RegionUnavailable)? };

        Ok(Region {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    /// Open existing region file or create a new zero-filled one of `capacity` bytes.
    ///
    /// The capacity of an existing file is used as-is.
    pub(crate) fn open_or_create(path: &Path, capacity: usize) -> Result<Region, BridgeError> {
        match Region::open(path) {
            Err(RegionUnavailable(err)) if err.kind() == io::ErrorKind::NotFound => {
                Region::create(path, capacity)?;
                Region::open(path)
            }
            res => res,
        }
    }

    /// Create a zero-filled region file at `path` unless one exists already.
    ///
    /// The file is sized in a private temporary file and hard-linked into place, so other
    /// participants never observe a partially created region and an existing one is never
    /// truncated. Returns whether this call created the region.
    pub(crate) fn create(path: &Path, capacity: usize) -> Result<bool, BridgeError> {
        let tmp_path = temporary_path(path);

        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true).truncate(true);

        // Only add mode on Unix-based systems to allow read/write from owner/group only
        #[cfg(unix)]
        opts.mode(0o660);

        let tmp_file = opts.open(&tmp_path).map_err(RegionUnavailable)?;
        let created = tmp_file
            .set_len(capacity as u64)
            .and_then(|_| fs::hard_link(&tmp_path, path));
        let _ = fs::remove_file(&tmp_path);

        match created {
            Ok(()) => {
                tracing::debug!(path = %path.display(), capacity, "created region");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(RegionUnavailable(err)),
        }
    }

    /// Total mapped size in bytes
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mmap.len()
    }

    /// Acquire the region lock using spin strategy `S`
    #[inline]
    pub(crate) fn lock<S: SpinStrategy>(&mut self) -> Result<RegionGuard<'_>, BridgeError> {
        S::acquire(self.flag(LOCK_OFFSET))?;
        Ok(RegionGuard::new(self))
    }

    /// Check `slot`'s dirty flag without taking the lock
    #[inline]
    pub(crate) fn is_dirty(&self, slot: Slot) -> bool {
        self.flag(slot.dirty_offset()).load(Ordering::Acquire) != 0
    }

    /// Whether `path` still links to the mapped file.
    #[cfg(unix)]
    pub(crate) fn is_linked(&self) -> io::Result<bool> {
        let mapped = self.file.metadata()?;
        match fs::metadata(&self.path) {
            Ok(linked) => Ok(mapped.dev() == linked.dev() && mapped.ino() == linked.ino()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether `path` still links to the mapped file.
    #[cfg(not(unix))]
    pub(crate) fn is_linked(&self) -> io::Result<bool> {
        Ok(self.path.exists())
    }

    /// Remove the backing file, the mapping itself stays valid until dropped
    #[inline]
    pub(crate) fn unlink(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }

    /// View a single byte of the region as an atomic flag
    #[inline]
    pub(crate) fn flag(&self, offset: usize) -> &AtomicU8 {
        assert!(offset < self.mmap.len());
        unsafe { &*(self.mmap.as_ptr().add(offset) as *const AtomicU8) }
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

/// Per-process counter keeping temporary files of concurrent creators apart
static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temporary_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(
        ".{}.{}.tmp",
        nix::unistd::getpid(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(tmp)
}
