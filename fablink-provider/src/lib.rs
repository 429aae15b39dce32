// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Fabric provider boundary
//!
//! This crate defines the contract between the rank-addressed messaging layer
//! and the underlying fabric transport: provider discovery, fabric domains,
//! address vectors, endpoints and completion queues. Backends implement the
//! traits in [interface]; the [udp] backend is a userspace polyfill over
//! non-blocking UDP sockets for fabrics without RDMA hardware.

#![no_std]
#![deny(
    clippy::std_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::alloc_instead_of_core
)]

extern crate alloc;
extern crate std;

pub mod interface;
#[cfg(feature = "udp")]
pub mod udp;
