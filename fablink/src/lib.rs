// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Rank-addressed messaging over an RDMA-style fabric.
//!
//! # Links and ranks
//!
//! A [Link](crate::link::Link) is a typed channel between participants
//! identified by contiguous, zero-based [ranks](crate::ids::Rank). A link is
//! constructed with the total participant count and the local rank; remote
//! participants are registered as send destinations, and a single local
//! receiver endpoint serves all receives.
//!
//! # Fabric context
//!
//! All links of a process share one [FabricContext](crate::context::FabricContext)
//! holding the negotiated provider, the fabric domain and the address vector.
//! The context must be initialized before the first link is constructed and
//! finalized only after the last link is dropped.
//!
//! # Waiting model
//!
//! Blocking operations busy-spin on a completion queue until the fabric
//! produces a completion; there is no internal scheduler, callback dispatch,
//! timeout or cancellation. This fits dedicated communication threads. The
//! non-blocking post/poll operations exist for callers that interleave
//! communication with other work.

#![no_std]
#![deny(
    clippy::std_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::alloc_instead_of_core
)]

extern crate alloc;
extern crate std;

pub mod context;
pub mod error;
pub mod ids;
pub mod link;

pub use context::FabricContext;
pub use error::Error;
pub use ids::Rank;
pub use link::{Link, Payload};

pub use fablink_provider as provider;
