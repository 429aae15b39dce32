// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Rank-addressed typed links
//!
//! A [Link] composes address resolution, endpoint management and the
//! messaging engine into a typed channel addressed by [Rank]. A link owns
//! its endpoint, its two completion queues and its two context tokens
//! exclusively; sharing a link across threads requires external locking.

pub(crate) mod endpoint;
mod engine;

use crate::context::FabricContext;
use crate::error::Error;
use crate::ids::Rank;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::marker::PhantomData;
use endpoint::LinkEndpoint;
use fablink_provider::interface::{FabricAddr, RecvData};
use log::debug;
use postcard::experimental::max_size::MaxSize;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload types that can travel over a [Link]
///
/// The bound gives a compile-time maximum for the encoded size, which sizes
/// the receive buffers of the typed path.
pub trait Payload: Serialize + DeserializeOwned + MaxSize {}

impl<T: Serialize + DeserializeOwned + MaxSize> Payload for T {}

/// Typed channel between `cardinality` participants
///
/// Configured in two halves: every remote destination is registered with
/// [configure_send_destination](Link::configure_send_destination), and the
/// local endpoint is brought up once with
/// [configure_local_receiver](Link::configure_local_receiver). All data
/// operations require the local receiver, since they post on its endpoint.
///
/// The typed and raw paths share the link's per-direction context tokens;
/// mixing them concurrently is unsupported, sequential use is fine.
pub struct Link<T> {
    ctx: Arc<FabricContext>,
    self_rank: Rank,
    rank_to_addr: Vec<Option<FabricAddr>>,
    endpoint: Option<LinkEndpoint>,
    posted: Option<PostedReceive>,
    _payload: PhantomData<T>,
}

/// State of the single outstanding non-blocking receive
struct PostedReceive {
    /// Filled once a poll popped the completion
    ready: Option<RecvData>,
}

impl<T> Link<T> {
    /// Create a link for `self_rank` among `cardinality` participants
    pub fn new(ctx: Arc<FabricContext>, cardinality: u64, self_rank: Rank) -> Result<Self, Error> {
        if self_rank.id() >= cardinality {
            return Err(Error::RankOutOfRange(self_rank, cardinality));
        }
        Ok(Self {
            ctx,
            self_rank,
            rank_to_addr: vec![None; cardinality as usize],
            endpoint: None,
            posted: None,
            _payload: PhantomData,
        })
    }

    pub fn self_rank(&self) -> Rank {
        self.self_rank
    }

    pub fn cardinality(&self) -> u64 {
        self.rank_to_addr.len() as u64
    }

    /// Register the endpoint address of rank `to`
    ///
    /// Resolves (node, service) through the shared address vector and maps
    /// the rank to the resulting opaque address. Call exactly once per
    /// destination; re-inserting the same descriptor is not guaranteed to
    /// yield the same handle.
    pub fn configure_send_destination(
        &mut self,
        to: Rank,
        node: &str,
        service: &str,
    ) -> Result<(), Error> {
        self.check_rank(to)?;
        let addr = self
            .ctx
            .address_vector()
            .insert(node, service)
            .map_err(Error::Fabric)?;
        if let Some(resolved) = self.ctx.address_vector().lookup(addr) {
            debug!("link {}: mapped {to} -> {addr} ({resolved})", self.self_rank);
        }
        self.rank_to_addr[to.index()] = Some(addr);
        Ok(())
    }

    /// Bring up the local endpoint on (node, service)
    ///
    /// Exactly one receiver configuration is permitted per link.
    pub fn configure_local_receiver(&mut self, node: &str, service: &str) -> Result<(), Error> {
        if self.endpoint.is_some() {
            return Err(Error::ReceiverAlreadyConfigured);
        }
        self.endpoint = Some(LinkEndpoint::new(&self.ctx, node, service)?);
        Ok(())
    }

    /// Blocking untyped send of a byte buffer to rank `to`
    pub fn send_raw(&mut self, data: &[u8], to: Rank) -> Result<(), Error> {
        let addr = self.addr_of(to)?;
        self.endpoint_mut()?.blocking_send_bytes(data, addr)
    }

    /// Blocking untyped receive from rank `from`
    ///
    /// Fills `buf` from the front and returns the number of received bytes.
    pub fn recv_raw(&mut self, buf: &mut [u8], from: Rank) -> Result<usize, Error> {
        if self.posted.is_some() {
            return Err(Error::ReceiveAlreadyPosted);
        }
        let addr = self.addr_of(from)?;
        let data = self
            .endpoint_mut()?
            .blocking_recv_bytes(buf.len(), Some(addr))?;
        buf[..data.len].copy_from_slice(data.bytes());
        Ok(data.len)
    }

    /// Blocking untyped wildcard receive
    ///
    /// Consumes an outstanding posted receive first, like
    /// [recv](Link::recv) on the typed path.
    pub fn recv_raw_any(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let data = if let Some(posted) = self.posted.take() {
            match posted.ready {
                Some(data) => data,
                None => self.endpoint_mut()?.wait_recv_completion()?,
            }
        } else {
            self.endpoint_mut()?.blocking_recv_bytes(buf.len(), None)?
        };
        buf[..data.len].copy_from_slice(data.bytes());
        Ok(data.len)
    }

    /// Non-blocking untyped send
    pub fn post_send_raw(&mut self, data: &[u8], to: Rank) -> Result<(), Error> {
        let addr = self.addr_of(to)?;
        self.endpoint_mut()?.post_send_bytes(data, addr)
    }

    /// Non-blocking untyped wildcard receive of up to `capacity` bytes
    pub fn post_receive_raw(&mut self, capacity: usize) -> Result<(), Error> {
        if self.posted.is_some() {
            return Err(Error::ReceiveAlreadyPosted);
        }
        self.endpoint_mut()?.post_recv_buffer(capacity, None)?;
        self.posted = Some(PostedReceive { ready: None });
        Ok(())
    }

    /// Non-blocking single-shot check of the receive queue
    ///
    /// Returns true exactly once per completed receive: the poll that
    /// observes the completion pops it and stores the message on the link;
    /// later polls return false until another message arrives.
    pub fn poll_receive_ready(&mut self) -> Result<bool, Error> {
        match self.endpoint_mut()?.poll_recv()? {
            Some(data) => match self.posted.as_mut() {
                Some(posted) => {
                    posted.ready = Some(data);
                    Ok(true)
                }
                None => Err(Error::NoPostedReceive),
            },
            None => Ok(false),
        }
    }

    fn check_rank(&self, rank: Rank) -> Result<(), Error> {
        if rank.id() >= self.cardinality() {
            return Err(Error::RankOutOfRange(rank, self.cardinality()));
        }
        Ok(())
    }

    fn addr_of(&self, rank: Rank) -> Result<FabricAddr, Error> {
        self.check_rank(rank)?;
        self.rank_to_addr[rank.index()].ok_or(Error::UnresolvedRank(rank))
    }

    fn endpoint_mut(&mut self) -> Result<&mut LinkEndpoint, Error> {
        self.endpoint.as_mut().ok_or(Error::ReceiverNotConfigured)
    }
}

impl<T: Payload> Link<T> {
    /// Blocking send of `payload` to rank `to`
    pub fn send(&mut self, payload: &T, to: Rank) -> Result<(), Error> {
        let addr = self.addr_of(to)?;
        let mut buf = vec![0u8; T::POSTCARD_MAX_SIZE];
        let used = postcard::to_slice(payload, &mut buf)?.len();
        self.endpoint_mut()?.blocking_send_bytes(&buf[..used], addr)
    }

    /// Blocking directed receive: only completes for a message from `from`
    pub fn recv_from(&mut self, from: Rank) -> Result<T, Error> {
        if self.posted.is_some() {
            return Err(Error::ReceiveAlreadyPosted);
        }
        let addr = self.addr_of(from)?;
        let data = self
            .endpoint_mut()?
            .blocking_recv_bytes(T::POSTCARD_MAX_SIZE, Some(addr))?;
        decode(&data)
    }

    /// Blocking wildcard receive: completes on the first arriving message
    ///
    /// A message already delivered through
    /// [poll_receive_ready](Link::poll_receive_ready) is consumed first.
    pub fn recv(&mut self) -> Result<T, Error> {
        if let Some(posted) = self.posted.take() {
            let data = match posted.ready {
                Some(data) => data,
                None => self.endpoint_mut()?.wait_recv_completion()?,
            };
            return decode(&data);
        }
        let data = self
            .endpoint_mut()?
            .blocking_recv_bytes(T::POSTCARD_MAX_SIZE, None)?;
        decode(&data)
    }

    /// Blocking send to every other rank, in ascending rank order
    ///
    /// All destinations are attempted; failures are collected per
    /// destination and returned as [Error::Broadcast]. The local rank never
    /// receives its own broadcast.
    pub fn broadcast(&mut self, payload: &T) -> Result<(), Error> {
        let mut failures = Vec::new();
        for id in 0..self.cardinality() {
            let to = Rank::new(id);
            if to == self.self_rank {
                continue;
            }
            if let Err(e) = self.send(payload, to) {
                failures.push((to, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Broadcast(failures))
        }
    }

    /// Non-blocking send: posts and returns once the post is accepted
    ///
    /// Transient backpressure is retried internally; the completion is left
    /// on the send queue (sequential-use discipline, as for all paths).
    pub fn post_send(&mut self, payload: &T, to: Rank) -> Result<(), Error> {
        let addr = self.addr_of(to)?;
        let mut buf = vec![0u8; T::POSTCARD_MAX_SIZE];
        let used = postcard::to_slice(payload, &mut buf)?.len();
        self.endpoint_mut()?.post_send_bytes(&buf[..used], addr)
    }

    /// Non-blocking wildcard receive: posts a buffer and returns
    ///
    /// At most one receive may be outstanding per link; the arrival is
    /// observed with [poll_receive_ready](Link::poll_receive_ready) and the
    /// message consumed with [recv](Link::recv).
    pub fn post_receive(&mut self) -> Result<(), Error> {
        if self.posted.is_some() {
            return Err(Error::ReceiveAlreadyPosted);
        }
        self.endpoint_mut()?
            .post_recv_buffer(T::POSTCARD_MAX_SIZE, None)?;
        self.posted = Some(PostedReceive { ready: None });
        Ok(())
    }
}

fn decode<T: Payload>(data: &RecvData) -> Result<T, Error> {
    postcard::from_bytes(data.bytes()).map_err(Error::Codec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fablink_provider::udp::UdpProvider;

    type ByteLink = Link<u8>;

    fn context() -> Arc<FabricContext> {
        FabricContext::initialize(Arc::new(UdpProvider::new()), "127.0.0.1").unwrap()
    }

    #[test]
    fn self_rank_must_fit_cardinality() {
        let ctx = context();
        assert!(matches!(
            ByteLink::new(ctx, 2, Rank::new(2)),
            Err(Error::RankOutOfRange(_, 2))
        ));
    }

    #[test]
    fn double_receiver_configuration_is_rejected() {
        let ctx = context();
        let mut link = ByteLink::new(ctx, 2, Rank::new(0)).unwrap();
        link.configure_local_receiver("127.0.0.1", "0").unwrap();
        assert!(matches!(
            link.configure_local_receiver("127.0.0.1", "0"),
            Err(Error::ReceiverAlreadyConfigured)
        ));
    }

    #[test]
    fn sending_requires_a_configured_receiver() {
        let ctx = context();
        let mut link = ByteLink::new(ctx, 2, Rank::new(0)).unwrap();
        link.configure_send_destination(Rank::new(1), "127.0.0.1", "9000")
            .unwrap();
        assert!(matches!(
            link.send(&7, Rank::new(1)),
            Err(Error::ReceiverNotConfigured)
        ));
    }

    #[test]
    fn sending_to_an_unresolved_rank_is_rejected() {
        let ctx = context();
        let mut link = ByteLink::new(ctx, 2, Rank::new(0)).unwrap();
        link.configure_local_receiver("127.0.0.1", "0").unwrap();
        assert!(matches!(
            link.send(&7, Rank::new(1)),
            Err(Error::UnresolvedRank(_))
        ));
    }

    #[test]
    fn out_of_range_destination_is_rejected() {
        let ctx = context();
        let mut link = ByteLink::new(ctx, 2, Rank::new(0)).unwrap();
        assert!(matches!(
            link.configure_send_destination(Rank::new(5), "127.0.0.1", "9000"),
            Err(Error::RankOutOfRange(_, 2))
        ));
    }

    #[test]
    fn context_finalize_refuses_while_a_link_is_alive() {
        let ctx = context();
        let link = ByteLink::new(Arc::clone(&ctx), 1, Rank::new(0)).unwrap();
        assert!(matches!(
            FabricContext::finalize(Arc::clone(&ctx)),
            Err(Error::ContextInUse)
        ));
        drop(link);
        FabricContext::finalize(ctx).unwrap();
    }
}
