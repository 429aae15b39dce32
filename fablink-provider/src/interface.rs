// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Fabric interface
//!
//! The messaging layer never talks to a transport directly; it goes through
//! the trait family defined here. The design mirrors the capabilities of a
//! connectionless reliable-datagram fabric:
//! - providers are discovered against node/service hints and capability flags,
//! - a selected provider yields a domain,
//! - the domain yields address vectors, completion queues and endpoints,
//! - endpoints are bound to an address vector and two completion queues
//!   before being enabled,
//! - data operations are posted non-blocking and report backpressure as a
//!   distinct try-again status; completion is observed by polling a queue.
//!
//! Handles are shared as `Arc<dyn ..>` trait objects. Binding an endpoint to
//! a handle from a different backend is rejected at runtime; backends use
//! [`core::any::Any`] downcasts at the bind seam.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::io;

/// Opaque fabric-level address obtained from address-vector insertion
///
/// Stable for the process lifetime. Only meaningful to the address vector
/// that produced it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FabricAddr(u64);

impl FabricAddr {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FabricAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fa:{}", self.0)
    }
}

/// Completion context token
///
/// Correlates a posted operation with the completion later observed on a
/// queue. Tokens are allocated from a process-wide counter; callers reuse one
/// token per direction and are expected to use each direction sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextToken(u64);

impl ContextToken {
    /// Allocate a fresh token
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wire protocol implemented by a discovered provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Raw unreliable datagrams
    Datagram,
    /// Reliability and ordering layered over raw datagrams
    ReliableDatagram,
}

/// Capability flags used as discovery hints
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Message send/receive semantics
    pub messaging: bool,
    /// Receives that only match a given source address
    pub directed_receive: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            messaging: true,
            directed_receive: true,
        }
    }
}

/// Discovery hints handed to [`Provider::discover`]
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryQuery<'a> {
    pub node: Option<&'a str>,
    pub service: Option<&'a str>,
    /// Whether node/service name the local source address
    pub source: bool,
    pub caps: Capabilities,
}

impl<'a> DiscoveryQuery<'a> {
    /// Query scoped to a local node, e.g. for process-wide negotiation
    pub fn node(node: &'a str) -> Self {
        Self {
            node: Some(node),
            service: None,
            source: false,
            caps: Capabilities::default(),
        }
    }

    /// Source-qualified query naming the local address of a new endpoint
    pub fn source(node: &'a str, service: &'a str) -> Self {
        Self {
            node: Some(node),
            service: Some(service),
            source: true,
            caps: Capabilities::default(),
        }
    }
}

/// One candidate descriptor returned by discovery
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub protocol: Protocol,
    pub version: (u32, u32),
    /// Send submission queue depth negotiated with the transport
    pub tx_queue_depth: usize,
    /// Receive submission queue depth negotiated with the transport
    pub rx_queue_depth: usize,
    /// Largest payload a single post may carry
    pub max_message_size: usize,
    /// Node the query was scoped to, if any
    pub node: Option<String>,
    /// Service the query was scoped to, if any
    pub service: Option<String>,
}

/// Buffer delivered by a completed receive
#[derive(Debug)]
pub struct RecvData {
    /// The buffer handed back by the transport
    pub buffer: Vec<u8>,
    /// Number of valid bytes at the front of `buffer`
    pub len: usize,
}

impl RecvData {
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

/// A completed operation popped from a completion queue
#[derive(Debug)]
pub struct Completion {
    /// Token the operation was posted with
    pub context: ContextToken,
    /// Filled buffer for receive completions, `None` for send completions
    pub recv: Option<RecvData>,
}

/// Result of a single non-blocking completion-queue read
#[derive(Debug)]
pub enum CqState {
    /// One completion was popped
    Ready(Completion),
    /// No completion pending; a normal condition, not a failure
    Empty,
    /// The transport reported an unrecoverable fault
    Fault(FabricError),
}

/// Fabric-level error type
#[non_exhaustive]
#[derive(Debug)]
pub enum FabricError {
    Discovery(&'static str),
    Resolve(String),
    Io(io::Error),
    UnknownAddress(FabricAddr),
    NotBound(&'static str),
    NotEnabled,
    Closed,
    MessageTooLong { len: usize, max: usize },
    Unsupported(&'static str),
}

impl core::error::Error for FabricError {}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FabricError::Discovery(reason) => write!(f, "discovery failed: {reason}"),
            FabricError::Resolve(spec) => write!(f, "failed to resolve address {spec}"),
            FabricError::Io(e) => write!(f, "io error: {e}"),
            FabricError::UnknownAddress(addr) => {
                write!(f, "address {addr} not present in the address vector")
            }
            FabricError::NotBound(what) => write!(f, "endpoint is not bound to a {what}"),
            FabricError::NotEnabled => write!(f, "endpoint is not enabled"),
            FabricError::Closed => write!(f, "endpoint is closed"),
            FabricError::MessageTooLong { len, max } => {
                write!(f, "message of {len} bytes exceeds the transport limit of {max}")
            }
            FabricError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl From<io::Error> for FabricError {
    fn from(err: io::Error) -> Self {
        FabricError::Io(err)
    }
}

/// Failure of a post operation
#[derive(Debug)]
pub enum PostError {
    /// The submission queue is full; retrying later may succeed
    Again,
    /// Hard fault; retrying cannot succeed
    Fault(FabricError),
}

impl core::error::Error for PostError {}

impl fmt::Display for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::Again => write!(f, "submission queue full, try again"),
            PostError::Fault(e) => write!(f, "post fault: {e}"),
        }
    }
}

/// A discoverable fabric transport
pub trait Provider: Send + Sync {
    /// Provider name, for diagnostics
    fn name(&self) -> &str;

    /// Return zero or more candidate descriptors matching `query`
    fn discover(&self, query: &DiscoveryQuery) -> Result<Vec<ProviderInfo>, FabricError>;

    /// Open a domain on the fabric described by `info`
    fn open_domain(&self, info: &ProviderInfo) -> Result<Arc<dyn Domain>, FabricError>;
}

/// An opened fabric domain
pub trait Domain: Send + Sync {
    fn create_address_vector(&self) -> Result<Arc<dyn AddressVector>, FabricError>;

    /// Create a completion queue with non-blocking wait semantics
    fn create_completion_queue(&self, depth: usize) -> Result<Arc<dyn CompletionQueue>, FabricError>;

    /// Create an endpoint bound to the local address carried by `info`
    fn create_endpoint(&self, info: &ProviderInfo) -> Result<Box<dyn Endpoint>, FabricError>;
}

/// Table mapping (node, service) descriptors to opaque fabric addresses
///
/// Inserting the same descriptor twice is not guaranteed to return the same
/// handle.
pub trait AddressVector: Send + Sync {
    fn insert(&self, node: &str, service: &str) -> Result<FabricAddr, FabricError>;

    /// Human-readable form of a previously inserted address, for diagnostics
    fn lookup(&self, addr: FabricAddr) -> Option<String>;

    /// Backend downcast hook used at endpoint bind time
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Ordered record of completed operations, read via non-blocking polls
pub trait CompletionQueue: Send + Sync {
    /// Pop at most one completion
    fn read(&self) -> CqState;

    /// Backend downcast hook used at endpoint bind time
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A local send/receive capability
///
/// Lifecycle: created, bound to an address vector and to one completion
/// queue per direction, then enabled. Posts are only valid on an enabled
/// endpoint.
pub trait Endpoint: Send {
    fn bind_address_vector(&mut self, av: &Arc<dyn AddressVector>) -> Result<(), FabricError>;

    fn bind_send_queue(&mut self, cq: &Arc<dyn CompletionQueue>) -> Result<(), FabricError>;

    fn bind_receive_queue(&mut self, cq: &Arc<dyn CompletionQueue>) -> Result<(), FabricError>;

    fn enable(&mut self) -> Result<(), FabricError>;

    /// Post a send towards `to`; completion appears on the send queue
    fn post_send(&mut self, data: &[u8], to: FabricAddr, context: ContextToken)
        -> Result<(), PostError>;

    /// Post a receive of up to `capacity` bytes
    ///
    /// With `from` set the receive only matches datagrams from that address;
    /// without it the first arriving datagram matches. The filled buffer is
    /// handed back in the completion.
    fn post_recv(
        &mut self,
        capacity: usize,
        from: Option<FabricAddr>,
        context: ContextToken,
    ) -> Result<(), PostError>;

    fn close(&mut self) -> Result<(), FabricError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tokens_are_unique() {
        let a = ContextToken::next();
        let b = ContextToken::next();
        assert_ne!(a, b);
    }

    #[test]
    fn default_capabilities_request_directed_receive() {
        let caps = Capabilities::default();
        assert!(caps.messaging);
        assert!(caps.directed_receive);
    }

    #[test]
    fn source_query_is_source_qualified() {
        let query = DiscoveryQuery::source("127.0.0.1", "9000");
        assert!(query.source);
        assert_eq!(query.node, Some("127.0.0.1"));
        assert_eq!(query.service, Some("9000"));
    }
}
