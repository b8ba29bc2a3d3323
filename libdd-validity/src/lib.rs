// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Validity handles let an object hand out cheap, thread-safe tokens that
//! its dependents can check before touching it. See [`ValidityHandle`].

mod arc;
mod error;
mod handle;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::*;
pub use handle::*;
