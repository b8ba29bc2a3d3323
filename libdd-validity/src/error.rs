// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::arc::ArcOverflow;
use allocator_api2::alloc::AllocError;

/// Failures that can be detected while creating or copying a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidityError {
    /// The shared state of a new group could not be allocated.
    #[error("validity handle: out of memory")]
    OutOfMemory,
    /// Too many handles reference the same group.
    #[error("validity handle: reference count overflow")]
    ReferenceCountOverflow,
}

impl From<AllocError> for ValidityError {
    fn from(_: AllocError) -> Self {
        ValidityError::OutOfMemory
    }
}

impl From<ArcOverflow> for ValidityError {
    fn from(_: ArcOverflow) -> Self {
        ValidityError::ReferenceCountOverflow
    }
}
