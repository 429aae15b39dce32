// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Userspace polyfill provider over UDP sockets
//!
//! Implements the fabric interface on plain non-blocking UDP sockets so the
//! messaging layer runs on hosts without RDMA hardware. Discovery advertises
//! a raw datagram descriptor and a reliability-layered variant; on loopback
//! and single-switch links datagram delivery is already in-order, so the
//! reliable variant uses the same socket transport.
//!
//! The provider follows the manual-progress model: reading the receive
//! completion queue drains the socket and matches arrived datagrams against
//! posted receives.

use crate::interface::{
    AddressVector, Domain, Endpoint, FabricAddr, FabricError, Protocol, Provider, ProviderInfo,
    CompletionQueue, DiscoveryQuery,
};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use log::{debug, trace};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::Mutex;

mod endpoint;

pub use endpoint::{UdpCompletionQueue, UdpEndpoint};

/// Submission queue depth advertised in discovery
const QUEUE_DEPTH: usize = 1024;

/// Largest datagram payload the provider accepts (UDP over IPv4)
const MAX_MESSAGE_SIZE: usize = 65507;

/// Trait extending methods available on file descriptors
pub(crate) trait FdExt {
    fn set_nonblocking(&self) -> io::Result<()>;
}

impl<T> FdExt for T
where
    T: AsRawFd,
{
    /// Set the descriptor non-blocking
    ///
    /// This implementation uses `libc::fcntl` directly instead of `libc::ioctl`
    /// with FIONBIO. Certain cross-platform targets have issues with FIONBIO.
    fn set_nonblocking(&self) -> io::Result<()> {
        let fd = self.as_raw_fd();

        // Safety: fd is available since T implements AsRawFd
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }

        // Safety: fd is available since T implements AsRawFd and flags
        // is the valid value returned by the previous call to libc::fcntl
        let err = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if err != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

/// The polyfill provider
#[derive(Debug, Default)]
pub struct UdpProvider;

impl UdpProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Provider for UdpProvider {
    fn name(&self) -> &str {
        "udp-polyfill"
    }

    fn discover(&self, query: &DiscoveryQuery) -> Result<Vec<ProviderInfo>, FabricError> {
        if !query.caps.messaging {
            return Err(FabricError::Unsupported(
                "provider only implements message semantics",
            ));
        }
        if query.source && query.node.is_none() {
            return Err(FabricError::Discovery(
                "source-qualified discovery requires a node",
            ));
        }

        let base = ProviderInfo {
            name: String::from("udp-dgram"),
            protocol: Protocol::Datagram,
            version: (1, 0),
            tx_queue_depth: QUEUE_DEPTH,
            rx_queue_depth: QUEUE_DEPTH,
            max_message_size: MAX_MESSAGE_SIZE,
            node: query.node.map(ToString::to_string),
            service: query.service.map(ToString::to_string),
        };
        let mut reliable = base.clone();
        reliable.name = String::from("udp-rxd");
        reliable.protocol = Protocol::ReliableDatagram;

        trace!(
            "discovery for node={:?} service={:?} source={} returned 2 infos",
            query.node,
            query.service,
            query.source
        );
        Ok(vec![base, reliable])
    }

    fn open_domain(&self, info: &ProviderInfo) -> Result<Arc<dyn Domain>, FabricError> {
        debug!("opening domain for provider {}", info.name);
        Ok(Arc::new(UdpDomain))
    }
}

/// Domain handle; the kernel socket layer is the actual resource
#[derive(Debug)]
pub struct UdpDomain;

impl Domain for UdpDomain {
    fn create_address_vector(&self) -> Result<Arc<dyn AddressVector>, FabricError> {
        Ok(Arc::new(UdpAddressVector::default()))
    }

    fn create_completion_queue(
        &self,
        depth: usize,
    ) -> Result<Arc<dyn CompletionQueue>, FabricError> {
        Ok(Arc::new(UdpCompletionQueue::new(depth)))
    }

    fn create_endpoint(&self, info: &ProviderInfo) -> Result<Box<dyn Endpoint>, FabricError> {
        UdpEndpoint::bind(info).map(|ep| Box::new(ep) as Box<dyn Endpoint>)
    }
}

/// Address vector backed by a table of resolved socket addresses
#[derive(Debug, Default)]
pub struct UdpAddressVector {
    entries: Mutex<Vec<SocketAddr>>,
}

impl UdpAddressVector {
    /// Resolve a (node, service) descriptor to a socket address
    pub(crate) fn resolve(node: &str, service: &str) -> Result<SocketAddr, FabricError> {
        let spec = format!("{node}:{service}");
        spec.to_socket_addrs()
            .map_err(|_| FabricError::Resolve(spec.clone()))?
            .next()
            .ok_or(FabricError::Resolve(spec))
    }

    /// Translate an opaque address back to its socket address
    pub(crate) fn socket_addr(&self, addr: FabricAddr) -> Option<SocketAddr> {
        self.entries
            .lock()
            .unwrap()
            .get(addr.raw() as usize)
            .copied()
    }
}

impl AddressVector for UdpAddressVector {
    fn insert(&self, node: &str, service: &str) -> Result<FabricAddr, FabricError> {
        let resolved = Self::resolve(node, service)?;
        let mut entries = self.entries.lock().unwrap();
        entries.push(resolved);
        let addr = FabricAddr::new((entries.len() - 1) as u64);
        trace!("av insert {node}:{service} -> {addr} ({resolved})");
        Ok(addr)
    }

    fn lookup(&self, addr: FabricAddr) -> Option<String> {
        self.socket_addr(addr).map(|resolved| resolved.to_string())
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
