// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Allocators for checking how validity groups use memory.

use allocator_api2::alloc::{AllocError, Allocator, Global};
use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Forwards to [`Global`] and counts allocations and deallocations. Clones
/// share the same counters.
#[derive(Clone, Debug, Default)]
pub struct CountingAllocator {
    stats: Arc<AllocationStats>,
}

#[derive(Debug, Default)]
struct AllocationStats {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::SeqCst)
    }

    pub fn deallocations(&self) -> usize {
        self.stats.deallocations.load(Ordering::SeqCst)
    }

    /// Allocations not yet returned.
    pub fn live(&self) -> usize {
        self.allocations().saturating_sub(self.deallocations())
    }
}

// SAFETY: every block comes from `Global` and goes back to it unchanged; the
// counters don't touch the memory.
unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let ptr = Global.allocate(layout)?;
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats.deallocations.fetch_add(1, Ordering::SeqCst);
        Global.deallocate(ptr, layout)
    }
}

/// An allocator that is always out of memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingAllocator;

// SAFETY: no block is ever handed out, so there is nothing to deallocate.
unsafe impl Allocator for FailingAllocator {
    fn allocate(&self, _layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        Err(AllocError)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // Nothing is ever handed out.
    }
}
