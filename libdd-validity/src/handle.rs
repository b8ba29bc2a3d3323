// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::arc::Arc;
use crate::ValidityError;
use allocator_api2::alloc::{Allocator, Global};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;
use std::fmt;
use std::mem;

/// State shared by every handle of one group. The reference count lives in
/// the [`Arc`] around it; the lock only guards the liveness flag.
struct SharedState {
    liveness: ReentrantMutex<Cell<bool>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            liveness: ReentrantMutex::new(Cell::new(true)),
        }
    }
}

/// Lets dependents find out whether the object that handed them this handle
/// has been destroyed.
///
/// An owner embeds the *original* handle, created with
/// [`ValidityHandle::try_new`], and gives copies of it to the objects that
/// depend on it. When the original is dropped, every copy reports invalid
/// from then on. The shared state stays allocated until the last handle of
/// the group is gone, so a copy can always be queried safely.
///
/// The liveness flag can only be read through a [`ValidityGuard`]. While a
/// guard says the group is valid, the original cannot finish dropping, so
/// the owner is alive for as long as the guard is held:
///
/// ```
/// use libdd_validity::ValidityHandle;
///
/// let original = ValidityHandle::try_new()?;
/// let copy = original.clone();
///
/// assert!(copy.acquire().is_valid());
/// drop(original);
/// assert!(!copy.acquire().is_valid());
/// # Ok::<(), libdd_validity::ValidityError>(())
/// ```
///
/// The lock is re-entrant: a thread holding a guard may acquire the lock
/// again, through this handle or any other handle of the group, without
/// blocking itself. The lock is released when the last of its guards drops.
pub struct ValidityHandle<A: Allocator + Clone = Global> {
    state: Arc<SharedState, A>,
    is_original: bool,
}

impl ValidityHandle {
    /// Creates the original handle of a new group, in the global allocator.
    ///
    /// # Errors
    /// Returns [`ValidityError::OutOfMemory`] if the shared state can't be
    /// allocated. Nothing is left behind in that case.
    pub fn try_new() -> Result<Self, ValidityError> {
        Self::try_new_in(Global)
    }

    /// Like [`ValidityHandle::try_new`], but allocation failure is fatal and
    /// is reported through [`std::alloc::handle_alloc_error`], the same way
    /// the standard containers report it.
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(handle) => handle,
            Err(_) => std::alloc::handle_alloc_error(Arc::<SharedState>::allocation_layout()),
        }
    }
}

impl Default for ValidityHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator + Clone> ValidityHandle<A> {
    /// Creates the original handle of a new group, allocating the shared
    /// state with `alloc`. Copies of the handle share the allocator.
    ///
    /// # Errors
    /// Returns [`ValidityError::OutOfMemory`] if `alloc` fails.
    pub fn try_new_in(alloc: A) -> Result<Self, ValidityError> {
        let state = Arc::try_new_in(SharedState::new(), alloc)?;
        tracing::trace!("created validity group");
        Ok(Self {
            state,
            is_original: true,
        })
    }

    /// Creates a copy that shares this handle's group. The copy is never the
    /// original, whatever `self` is.
    ///
    /// # Errors
    /// Returns [`ValidityError::ReferenceCountOverflow`] if the group already
    /// has `isize::MAX` handles.
    pub fn try_clone(&self) -> Result<Self, ValidityError> {
        Ok(Self {
            state: self.state.try_clone()?,
            is_original: false,
        })
    }

    /// Makes `self` a copy of `source`.
    ///
    /// `self` joins the group of `source` as a non-original handle and lets go
    /// of its previous group, which is freed if `self` was its last handle.
    /// Reassigning the original doesn't invalidate its previous group: only
    /// dropping the original does, so that group stays valid from then on.
    ///
    /// No lock is taken, so handles reassigning from each other concurrently
    /// can't deadlock.
    ///
    /// # Errors
    /// Returns [`ValidityError::ReferenceCountOverflow`] if the group of
    /// `source` is full. `self` is left unchanged in that case.
    pub fn assign_from(&mut self, source: &Self) -> Result<(), ValidityError> {
        if !Arc::ptr_eq(&self.state, &source.state) {
            let previous = mem::replace(&mut self.state, source.state.try_clone()?);
            drop(previous);
        }
        if self.is_original {
            tracing::trace!("original validity handle reassigned");
            self.is_original = false;
        }
        Ok(())
    }

    /// Blocks until the group's lock is held by the current thread.
    pub fn acquire(&self) -> ValidityGuard<'_> {
        ValidityGuard {
            liveness: self.state.liveness.lock(),
        }
    }

    /// Takes the group's lock if no other thread holds it. Succeeds when the
    /// current thread already holds it. Never blocks.
    pub fn try_acquire(&self) -> Option<ValidityGuard<'_>> {
        let liveness = self.state.liveness.try_lock()?;
        Some(ValidityGuard { liveness })
    }

    /// Runs `f` under the group's lock if the group is still valid.
    ///
    /// The original can't finish dropping while `f` runs, so `f` may use the
    /// owner this handle was copied from. Returns `None` without calling `f`
    /// when the owner is already gone.
    pub fn with_valid<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.acquire();
        guard.is_valid().then(f)
    }

    /// Whether this is the handle whose drop invalidates the group.
    pub fn is_original(&self) -> bool {
        self.is_original
    }

    /// Whether both handles belong to the same group.
    pub fn shares_state_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Number of handles in this group, including `self`. Only a snapshot:
    /// other threads may clone or drop handles at any time.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.state)
    }

    fn publish_invalidation(&self) {
        let liveness = self.state.liveness.lock();
        liveness.set(false);
        tracing::trace!(handles = self.ref_count(), "validity group invalidated");
    }
}

impl<A: Allocator + Clone> Clone for ValidityHandle<A> {
    /// Aborts the process if the group's reference count would overflow, like
    /// `std::sync::Arc`. Use [`ValidityHandle::try_clone`] to handle it.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(%err, "failed to clone validity handle");
                std::process::abort()
            }
        }
    }

    /// Aborts the process if the group's reference count would overflow. Use
    /// [`ValidityHandle::assign_from`] to handle it.
    fn clone_from(&mut self, source: &Self) {
        if let Err(err) = self.assign_from(source) {
            tracing::error!(%err, "failed to assign validity handle");
            std::process::abort()
        }
    }
}

impl<A: Allocator + Clone> Drop for ValidityHandle<A> {
    fn drop(&mut self) {
        if self.is_original {
            self.publish_invalidation();
        }
        // `state` drops next, which frees the group if this was its last
        // handle.
    }
}

impl<A: Allocator + Clone> fmt::Debug for ValidityHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidityHandle")
            .field("is_original", &self.is_original)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// Proof that the current thread holds a group's lock. Dropping it, or
/// calling [`ValidityGuard::release`], releases that acquisition.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ValidityGuard<'a> {
    liveness: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl ValidityGuard<'_> {
    /// Whether the original handle of the group is still alive. Other threads
    /// can't invalidate the group while this guard is held.
    pub fn is_valid(&self) -> bool {
        self.liveness.get()
    }

    /// Releases this acquisition of the lock.
    pub fn release(self) {}
}

impl fmt::Debug for ValidityGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidityGuard")
            .field("is_valid", &self.is_valid())
            .finish()
    }
}
