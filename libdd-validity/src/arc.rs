// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
// This is heavily inspired by the standard library's `Arc` implementation,
// which is dual-licensed as Apache-2.0 or MIT.

use allocator_api2::alloc::{AllocError, Allocator, Global};
use allocator_api2::boxed::Box;
use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{fence, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;

/// A thread-safe reference-counting pointer with only strong references.
///
/// This is the storage behind every validity group: the last owner to let go
/// of it returns the memory to the allocator, exactly once. Unlike
/// `std::sync::Arc`:
/// - Construction uses fallible allocation via [`Arc::try_new_in`].
/// - Cloning uses [`Arc::try_clone`], which returns an error on reference-count overflow instead of
///   aborting the process.
/// - There are no weak references.
pub(crate) struct Arc<T, A: Allocator = Global> {
    ptr: NonNull<ArcInner<T>>,
    alloc: ManuallyDrop<A>,
    phantom: PhantomData<ArcInner<T>>,
}

// The counter sits on its own cache line so clones and drops on other threads
// don't contend with whoever holds the lock inside `data`.
struct ArcInner<T> {
    refcount: CachePadded<AtomicUsize>,
    data: T,
}

impl<T> ArcInner<T> {
    fn try_increment(&self) -> Result<(), ArcOverflow> {
        if self.refcount.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            self.refcount.fetch_sub(1, Ordering::Relaxed);
            return Err(ArcOverflow);
        }
        Ok(())
    }
}

impl<T> Arc<T> {
    /// The layout of a single allocation made for an `Arc<T>`.
    pub(crate) fn allocation_layout() -> Layout {
        Layout::new::<ArcInner<T>>()
    }
}

impl<T, A: Allocator> Arc<T, A> {
    /// Constructs a new `Arc<T, A>` in the provided allocator, returning an
    /// error if allocation fails.
    pub(crate) fn try_new_in(data: T, alloc: A) -> Result<Arc<T, A>, AllocError> {
        let inner = ArcInner {
            refcount: CachePadded::new(AtomicUsize::new(1)),
            data,
        };
        let boxed = Box::try_new_in(inner, alloc)?;
        let (ptr, alloc) = Box::into_raw_with_allocator(boxed);
        // SAFETY: pointers owned by a `Box` are never null.
        let ptr = unsafe { NonNull::new_unchecked(ptr) };
        Ok(Arc {
            ptr,
            alloc: ManuallyDrop::new(alloc),
            phantom: PhantomData,
        })
    }

    /// Returns true if both point to the same allocation.
    #[inline]
    pub(crate) fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Snapshot of the number of strong references. Other threads may change
    /// it as soon as this returns.
    #[inline]
    pub(crate) fn strong_count(this: &Self) -> usize {
        this.inner().refcount.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn force_strong_count(this: &Self, count: usize) {
        this.inner().refcount.store(count, Ordering::Relaxed);
    }

    #[inline]
    fn inner(&self) -> &ArcInner<T> {
        // SAFETY: `ptr` is a valid, live allocation managed by this Arc.
        unsafe { self.ptr.as_ref() }
    }
}

// SAFETY: `Arc<T, A>` is Send and Sync iff `T` is Send and Sync, and the
// allocator can be moved or shared along with it.
unsafe impl<T: Send + Sync, A: Allocator + Send> Send for Arc<T, A> {}
unsafe impl<T: Send + Sync, A: Allocator + Sync> Sync for Arc<T, A> {}

/// Error returned when the reference count would overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArcOverflow;

/// A limit on the amount of references that may be made to an `Arc`.
const MAX_REFCOUNT: usize = isize::MAX as usize;

impl<T, A: Allocator + Clone> Arc<T, A> {
    /// Fallible clone that increments the strong reference count.
    ///
    /// Returns an error if the reference count would exceed `isize::MAX`.
    pub(crate) fn try_clone(&self) -> Result<Self, ArcOverflow> {
        self.inner().try_increment()?;
        Ok(Arc {
            ptr: self.ptr,
            alloc: ManuallyDrop::new(A::clone(&self.alloc)),
            phantom: PhantomData,
        })
    }
}

impl<T, A: Allocator> Drop for Arc<T, A> {
    fn drop(&mut self) {
        if self.inner().refcount.fetch_sub(1, Ordering::Release) != 1 {
            // SAFETY: `alloc` is not used again after this point.
            unsafe { ManuallyDrop::drop(&mut self.alloc) };
            return;
        }
        // Synchronize with other threads that might have modified the data
        // before dropping their strong reference.
        fence(Ordering::Acquire);
        // SAFETY: `alloc` is taken once and never touched again.
        let alloc = unsafe { ManuallyDrop::take(&mut self.alloc) };
        // SAFETY: this was the last strong reference; reclaim the allocation
        // with the allocator that made it.
        unsafe { drop(Box::<ArcInner<T>, A>::from_raw_in(self.ptr.as_ptr(), alloc)) };
    }
}

impl<T, A: Allocator> Deref for Arc<T, A> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner().data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CountingAllocator;

    #[test]
    fn try_clone_shares_allocation() {
        let arc = Arc::try_new_in(5usize, Global).unwrap();
        let arc2 = arc.try_clone().unwrap();
        assert!(Arc::ptr_eq(&arc, &arc2));
        assert_eq!(Arc::strong_count(&arc), 2);
        assert_eq!(*arc2, 5);
        drop(arc);
        assert_eq!(Arc::strong_count(&arc2), 1);
    }

    #[test]
    fn separate_allocations_are_not_ptr_eq() {
        let a = Arc::try_new_in("abc", Global).unwrap();
        let b = Arc::try_new_in("abc", Global).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn last_drop_deallocates_once() {
        let alloc = CountingAllocator::new();
        let arc = Arc::try_new_in(7u64, alloc.clone()).unwrap();
        let clones: Vec<_> = (0..4).map(|_| arc.try_clone().unwrap()).collect();
        assert_eq!(alloc.allocations(), 1);

        drop(arc);
        drop(clones);
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(alloc.deallocations(), 1);
    }

    #[test]
    fn overflow_is_reported_and_undone() {
        let arc = Arc::try_new_in((), Global).unwrap();
        Arc::force_strong_count(&arc, MAX_REFCOUNT + 1);
        assert_eq!(arc.try_clone().err(), Some(ArcOverflow));
        assert_eq!(Arc::strong_count(&arc), MAX_REFCOUNT + 1);
        // Put the count back so the drop below reclaims the allocation.
        Arc::force_strong_count(&arc, 1);
    }
}
