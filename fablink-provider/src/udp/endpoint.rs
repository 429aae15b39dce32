// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! UDP endpoint and completion queues

use super::{FdExt, UdpAddressVector, MAX_MESSAGE_SIZE};
use crate::interface::{
    AddressVector, Completion, CompletionQueue, ContextToken, CqState, Endpoint, FabricAddr,
    FabricError, PostError, ProviderInfo, RecvData,
};
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use log::{trace, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;

/// One posted receive waiting for a matching datagram
struct PendingRecv {
    buffer: Vec<u8>,
    /// Directed receives only match this source; `None` matches any source
    filter: Option<SocketAddr>,
    context: ContextToken,
}

/// Receive-side state shared between the endpoint and its receive queue
///
/// Progress is driven from completion-queue reads: the socket is drained
/// into the unexpected-message queue, then pending receives are matched in
/// posting order. A directed receive never completes on a datagram from a
/// different source; such datagrams stay queued until a matching receive is
/// posted.
struct Shared {
    socket: UdpSocket,
    pending: Mutex<VecDeque<PendingRecv>>,
    unexpected: Mutex<VecDeque<(SocketAddr, Vec<u8>)>>,
    scratch: Mutex<Vec<u8>>,
}

impl Shared {
    fn progress(&self, cq: &UdpCompletionQueue) {
        let mut scratch = self.scratch.lock().unwrap();
        let mut unexpected = self.unexpected.lock().unwrap();

        loop {
            match self.socket.recv_from(&mut scratch) {
                Ok((len, src)) => {
                    trace!("received {len} bytes from {src}");
                    unexpected.push_back((src, scratch[..len].to_vec()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    cq.fail(FabricError::Io(e));
                    return;
                }
            }
        }

        let mut pending = self.pending.lock().unwrap();
        let mut i = 0;
        while i < pending.len() {
            let filter = pending[i].filter;
            let matched = unexpected
                .iter()
                .position(|(src, _)| filter.map_or(true, |f| f == *src));
            match matched {
                Some(pos) => {
                    let Some((src, data)) = unexpected.remove(pos) else {
                        break;
                    };
                    let Some(mut posted) = pending.remove(i) else {
                        break;
                    };
                    let len = data.len().min(posted.buffer.len());
                    if data.len() > posted.buffer.len() {
                        warn!("datagram from {src} truncated to {len} bytes");
                    }
                    posted.buffer[..len].copy_from_slice(&data[..len]);
                    cq.push(Completion {
                        context: posted.context,
                        recv: Some(RecvData {
                            buffer: posted.buffer,
                            len,
                        }),
                    });
                }
                None => i += 1,
            }
        }
    }
}

/// Completion queue backed by an in-memory deque
///
/// Reading the queue is non-destructive beyond the single popped entry and
/// never blocks. A queue bound as receive queue holds a weak reference to
/// the endpoint's shared state and drives progress on every read.
pub struct UdpCompletionQueue {
    depth: usize,
    entries: Mutex<VecDeque<Completion>>,
    fault: Mutex<Option<FabricError>>,
    source: Mutex<Option<Weak<Shared>>>,
}

impl UdpCompletionQueue {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            depth,
            entries: Mutex::new(VecDeque::new()),
            fault: Mutex::new(None),
            source: Mutex::new(None),
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    fn push(&self, completion: Completion) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.depth {
            warn!("completion queue overrun, dropping oldest entry");
            entries.pop_front();
        }
        entries.push_back(completion);
    }

    fn fail(&self, error: FabricError) {
        *self.fault.lock().unwrap() = Some(error);
    }

    fn attach_source(&self, shared: Weak<Shared>) {
        *self.source.lock().unwrap() = Some(shared);
    }
}

impl CompletionQueue for UdpCompletionQueue {
    fn read(&self) -> CqState {
        let source = self.source.lock().unwrap().clone();
        if let Some(shared) = source.as_ref().and_then(Weak::upgrade) {
            shared.progress(self);
        }

        if let Some(error) = self.fault.lock().unwrap().take() {
            return CqState::Fault(error);
        }

        match self.entries.lock().unwrap().pop_front() {
            Some(completion) => CqState::Ready(completion),
            None => CqState::Empty,
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Endpoint over one non-blocking UDP socket
///
/// Follows the fabric lifecycle: bind to an address vector and both
/// completion queues, then enable. Posting on a non-enabled endpoint is a
/// hard fault.
pub struct UdpEndpoint {
    shared: Arc<Shared>,
    av: Option<Arc<UdpAddressVector>>,
    txcq: Option<Arc<UdpCompletionQueue>>,
    rxcq: Option<Arc<UdpCompletionQueue>>,
    enabled: bool,
    closed: bool,
}

impl UdpEndpoint {
    /// Create an endpoint bound to the local address carried by `info`
    pub(crate) fn bind(info: &ProviderInfo) -> Result<Self, FabricError> {
        let node = info
            .node
            .as_deref()
            .ok_or(FabricError::Discovery("endpoint info carries no node"))?;
        let service = info
            .service
            .as_deref()
            .ok_or(FabricError::Discovery("endpoint info carries no service"))?;

        let local = UdpAddressVector::resolve(node, service)?;
        let socket = UdpSocket::bind(local)?;
        FdExt::set_nonblocking(&socket)?;
        trace!("endpoint bound to {}", socket.local_addr()?);

        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                pending: Mutex::new(VecDeque::new()),
                unexpected: Mutex::new(VecDeque::new()),
                scratch: Mutex::new(vec![0; MAX_MESSAGE_SIZE]),
            }),
            av: None,
            txcq: None,
            rxcq: None,
            enabled: false,
            closed: false,
        })
    }

    fn ensure_postable(&self) -> Result<(), PostError> {
        if self.closed {
            return Err(PostError::Fault(FabricError::Closed));
        }
        if !self.enabled {
            return Err(PostError::Fault(FabricError::NotEnabled));
        }
        Ok(())
    }

    fn resolve_peer(&self, addr: FabricAddr) -> Result<SocketAddr, PostError> {
        let av = self
            .av
            .as_ref()
            .ok_or(PostError::Fault(FabricError::NotBound("address vector")))?;
        av.socket_addr(addr)
            .ok_or(PostError::Fault(FabricError::UnknownAddress(addr)))
    }
}

impl Endpoint for UdpEndpoint {
    fn bind_address_vector(&mut self, av: &Arc<dyn AddressVector>) -> Result<(), FabricError> {
        let av = Arc::clone(av)
            .as_any_arc()
            .downcast::<UdpAddressVector>()
            .map_err(|_| FabricError::Unsupported("address vector from a different provider"))?;
        self.av = Some(av);
        Ok(())
    }

    fn bind_send_queue(&mut self, cq: &Arc<dyn CompletionQueue>) -> Result<(), FabricError> {
        let cq = Arc::clone(cq)
            .as_any_arc()
            .downcast::<UdpCompletionQueue>()
            .map_err(|_| FabricError::Unsupported("completion queue from a different provider"))?;
        self.txcq = Some(cq);
        Ok(())
    }

    fn bind_receive_queue(&mut self, cq: &Arc<dyn CompletionQueue>) -> Result<(), FabricError> {
        let cq = Arc::clone(cq)
            .as_any_arc()
            .downcast::<UdpCompletionQueue>()
            .map_err(|_| FabricError::Unsupported("completion queue from a different provider"))?;
        cq.attach_source(Arc::downgrade(&self.shared));
        self.rxcq = Some(cq);
        Ok(())
    }

    fn enable(&mut self) -> Result<(), FabricError> {
        if self.closed {
            return Err(FabricError::Closed);
        }
        if self.av.is_none() {
            return Err(FabricError::NotBound("address vector"));
        }
        if self.txcq.is_none() {
            return Err(FabricError::NotBound("send completion queue"));
        }
        if self.rxcq.is_none() {
            return Err(FabricError::NotBound("receive completion queue"));
        }
        self.enabled = true;
        Ok(())
    }

    fn post_send(
        &mut self,
        data: &[u8],
        to: FabricAddr,
        context: ContextToken,
    ) -> Result<(), PostError> {
        self.ensure_postable()?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(PostError::Fault(FabricError::MessageTooLong {
                len: data.len(),
                max: MAX_MESSAGE_SIZE,
            }));
        }
        let peer = self.resolve_peer(to)?;

        match self.shared.socket.send_to(data, peer) {
            Ok(sent) => {
                debug_assert_eq!(sent, data.len());
                trace!("sent {sent} bytes to {peer}");
                if let Some(txcq) = self.txcq.as_ref() {
                    txcq.push(Completion {
                        context,
                        recv: None,
                    });
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(PostError::Again),
            Err(e) => Err(PostError::Fault(FabricError::Io(e))),
        }
    }

    fn post_recv(
        &mut self,
        capacity: usize,
        from: Option<FabricAddr>,
        context: ContextToken,
    ) -> Result<(), PostError> {
        self.ensure_postable()?;
        let filter = match from {
            Some(addr) => Some(self.resolve_peer(addr)?),
            None => None,
        };

        let mut pending = self.shared.pending.lock().unwrap();
        if let Some(rxcq) = self.rxcq.as_ref() {
            if pending.len() >= rxcq.depth() {
                return Err(PostError::Again);
            }
        }
        pending.push_back(PendingRecv {
            buffer: vec![0; capacity],
            filter,
            context,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), FabricError> {
        if self.closed {
            return Err(FabricError::Closed);
        }
        let outstanding = self.shared.pending.lock().unwrap().len();
        if outstanding > 0 {
            warn!("closing endpoint with {outstanding} posted receives outstanding");
        }
        self.enabled = false;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{DiscoveryQuery, Domain, Provider};
    use crate::udp::{UdpDomain, UdpProvider};
    use alloc::boxed::Box;
    use alloc::string::ToString;
    use std::thread;

    struct Peer {
        endpoint: Box<dyn Endpoint>,
        txcq: Arc<dyn CompletionQueue>,
        rxcq: Arc<dyn CompletionQueue>,
        local: SocketAddr,
    }

    /// Bring up a fully bound and enabled endpoint on an OS-assigned port
    fn peer(domain: &Arc<dyn Domain>, av: &Arc<dyn AddressVector>) -> Peer {
        let provider = UdpProvider::new();
        let infos = provider
            .discover(&DiscoveryQuery::source("127.0.0.1", "0"))
            .unwrap();
        let info = &infos[0];

        let txcq = domain.create_completion_queue(info.tx_queue_depth).unwrap();
        let rxcq = domain.create_completion_queue(info.rx_queue_depth).unwrap();
        let concrete = UdpEndpoint::bind(info).unwrap();
        let local = concrete.shared.socket.local_addr().unwrap();
        let mut endpoint: Box<dyn Endpoint> = Box::new(concrete);
        endpoint.bind_address_vector(av).unwrap();
        endpoint.bind_send_queue(&txcq).unwrap();
        endpoint.bind_receive_queue(&rxcq).unwrap();
        endpoint.enable().unwrap();

        Peer {
            endpoint,
            txcq,
            rxcq,
            local,
        }
    }

    fn insert(av: &Arc<dyn AddressVector>, addr: SocketAddr) -> FabricAddr {
        av.insert("127.0.0.1", &addr.port().to_string()).unwrap()
    }

    /// Spin until the queue yields a completion
    fn read_ready(cq: &Arc<dyn CompletionQueue>) -> Completion {
        for _ in 0..100_000 {
            match cq.read() {
                CqState::Ready(completion) => return completion,
                CqState::Empty => thread::yield_now(),
                CqState::Fault(e) => panic!("completion queue fault: {e}"),
            }
        }
        panic!("no completion arrived");
    }

    #[test]
    fn post_before_enable_is_a_fault() {
        let provider = UdpProvider::new();
        let infos = provider
            .discover(&DiscoveryQuery::source("127.0.0.1", "0"))
            .unwrap();
        let mut endpoint = UdpEndpoint::bind(&infos[0]).unwrap();
        let result = endpoint.post_send(b"x", FabricAddr::new(0), ContextToken::next());
        assert!(matches!(
            result,
            Err(PostError::Fault(FabricError::NotEnabled))
        ));
    }

    #[test]
    fn enable_requires_all_bindings() {
        let provider = UdpProvider::new();
        let infos = provider
            .discover(&DiscoveryQuery::source("127.0.0.1", "0"))
            .unwrap();
        let mut endpoint = UdpEndpoint::bind(&infos[0]).unwrap();
        assert!(matches!(
            endpoint.enable(),
            Err(FabricError::NotBound("address vector"))
        ));
    }

    #[test]
    fn oversized_send_is_a_hard_fault() {
        let domain: Arc<dyn Domain> = Arc::new(UdpDomain);
        let av = domain.create_address_vector().unwrap();
        let mut a = peer(&domain, &av);
        let to = insert(&av, a.local);
        let huge = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let result = a.endpoint.post_send(&huge, to, ContextToken::next());
        assert!(matches!(
            result,
            Err(PostError::Fault(FabricError::MessageTooLong { .. }))
        ));
    }

    #[test]
    fn loopback_send_produces_both_completions() {
        let domain: Arc<dyn Domain> = Arc::new(UdpDomain);
        let av = domain.create_address_vector().unwrap();
        let mut a = peer(&domain, &av);
        let mut b = peer(&domain, &av);
        let b_addr = insert(&av, b.local);

        let tx_ctx = ContextToken::next();
        let rx_ctx = ContextToken::next();
        b.endpoint.post_recv(16, None, rx_ctx).unwrap();
        a.endpoint.post_send(b"ping", b_addr, tx_ctx).unwrap();

        let sent = read_ready(&a.txcq);
        assert_eq!(sent.context, tx_ctx);
        assert!(sent.recv.is_none());

        let received = read_ready(&b.rxcq);
        assert_eq!(received.context, rx_ctx);
        let data = received.recv.unwrap();
        assert_eq!(data.bytes(), b"ping");
    }

    #[test]
    fn directed_receive_ignores_other_sources() {
        let domain: Arc<dyn Domain> = Arc::new(UdpDomain);
        let av = domain.create_address_vector().unwrap();
        let mut a = peer(&domain, &av);
        let mut b = peer(&domain, &av);
        let mut c = peer(&domain, &av);
        let a_addr = insert(&av, a.local);
        let c_addr = insert(&av, c.local);

        // b arrives first, but the posted receive is directed at c.
        b.endpoint
            .post_send(b"from-b", a_addr, ContextToken::next())
            .unwrap();
        read_ready(&b.txcq);

        let rx_ctx = ContextToken::next();
        a.endpoint.post_recv(16, Some(c_addr), rx_ctx).unwrap();

        // The directed receive must stay pending even though b's datagram
        // is queued. Give the socket a moment, then check emptiness.
        for _ in 0..1_000 {
            assert!(matches!(a.rxcq.read(), CqState::Empty));
        }

        c.endpoint
            .post_send(b"from-c", a_addr, ContextToken::next())
            .unwrap();
        let completion = read_ready(&a.rxcq);
        assert_eq!(completion.context, rx_ctx);
        assert_eq!(completion.recv.unwrap().bytes(), b"from-c");

        // b's datagram is still deliverable to a wildcard receive.
        let wild_ctx = ContextToken::next();
        a.endpoint.post_recv(16, None, wild_ctx).unwrap();
        let completion = read_ready(&a.rxcq);
        assert_eq!(completion.context, wild_ctx);
        assert_eq!(completion.recv.unwrap().bytes(), b"from-b");
    }

    #[test]
    fn close_is_idempotent_only_once() {
        let domain: Arc<dyn Domain> = Arc::new(UdpDomain);
        let av = domain.create_address_vector().unwrap();
        let mut a = peer(&domain, &av);
        a.endpoint.close().unwrap();
        assert!(matches!(a.endpoint.close(), Err(FabricError::Closed)));
    }
}
