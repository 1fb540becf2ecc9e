//! Fixed-size image store shared between the refresher and the HTTP server

use crate::CacheError;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Image cache with one slot per configured page.
///
/// Every slot is either empty or holds the last image written to it. Readers
/// share the lock, a writer excludes everybody for the time it takes to swap
/// the slot. Data is copied on the way in and on the way out, so no caller
/// ever holds a reference into the cache.
///
/// # Examples
///
/// ```rust
/// use inkshot::{CacheError, ImageCache};
///
/// let cache = ImageCache::new(2);
/// assert_eq!(cache.get(0), Err(CacheError::SlotUninitialized(0)));
///
/// cache.set(0, &[0x42, 0x43]).unwrap();
/// assert_eq!(cache.get(0).unwrap(), vec![0x42, 0x43]);
/// ```
#[derive(Debug)]
pub struct ImageCache {
    images: RwLock<Vec<Option<Vec<u8>>>>,
}

impl ImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            images: RwLock::new(vec![None; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.read().len()
    }

    /// Stores a copy of `data` at `idx`, replacing the previous image.
    pub fn set(&self, idx: usize, data: &[u8]) -> Result<(), CacheError> {
        // Copy before taking the lock so writers hold it only for the swap.
        let image = data.to_vec();

        let mut images = self.write();
        let capacity = images.len();
        let slot = images
            .get_mut(idx)
            .ok_or(CacheError::IndexOutOfBounds { index: idx, capacity })?;
        *slot = Some(image);

        Ok(())
    }

    /// Returns a copy of the image at `idx`.
    pub fn get(&self, idx: usize) -> Result<Vec<u8>, CacheError> {
        let images = self.read();
        match images.get(idx) {
            None => Err(CacheError::IndexOutOfBounds {
                index: idx,
                capacity: images.len(),
            }),
            Some(None) => Err(CacheError::SlotUninitialized(idx)),
            Some(Some(image)) => Ok(image.clone()),
        }
    }

    pub fn is_initialized(&self, idx: usize) -> bool {
        matches!(self.read().get(idx), Some(Some(_)))
    }

    /// Number of slots holding an image.
    pub fn initialized_count(&self) -> usize {
        self.read().iter().filter(|slot| slot.is_some()).count()
    }

    // A panic while holding the lock cannot leave a slot half-written (the
    // swap is a single assignment), so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Option<Vec<u8>>>> {
        self.images.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Option<Vec<u8>>>> {
        self.images.write().unwrap_or_else(PoisonError::into_inner)
    }
}
