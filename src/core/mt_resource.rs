use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// `MtResource` lets a value be handed out to other threads (a mesh builder, a
/// neighbor tile's decoration pass) without handing out the object that owns it.
/// It wraps an `Arc<RwLock<T>>`; the lock is a `parking_lot` lock, so it cannot be
/// poisoned and neither accessor can fail.
///
/// # Examples
///
/// ```
/// use tile_scheduler::core::MtResource;
///
/// let counter = MtResource::new(0);
/// let shared = counter.clone();
///
/// std::thread::spawn(move || *shared.get_mut() += 1)
///     .join()
///     .unwrap();
///
/// assert_eq!(*counter.get(), 1);
/// ```
///
/// # Performance Considerations
/// - Read operations (`get()`) can occur concurrently
/// - Write operations (`get_mut()`) are exclusive and will block other operations
/// - Never hold a guard from one `MtResource` while acquiring a write guard on
///   another that may be locked in the opposite order elsewhere
pub struct MtResource<T> {
    resource: Arc<RwLock<T>>,
}

impl<T> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard that allows reading the contained value.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read()
    }

    /// Returns a mutable guard that allows modifying the contained value.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write()
    }
}

impl<T> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

impl<T: Default> Default for MtResource<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
