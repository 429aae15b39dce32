// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Messaging engine: blocking and non-blocking data paths
//!
//! All paths share the link's two context tokens, one per direction; the
//! engine assumes sequential use per direction and cannot distinguish
//! multiple in-flight operations of the same direction.
//!
//! Waiting is a tight non-blocking poll loop on the completion queue. A
//! temporarily empty queue is the only tolerated poll outcome; any other
//! negative status is an unrecoverable transport fault.

use crate::error::Error;
use crate::link::endpoint::LinkEndpoint;
use core::hint;
use fablink_provider::interface::{
    Completion, CompletionQueue, CqState, FabricAddr, FabricError, PostError, RecvData,
};

impl LinkEndpoint {
    /// Post a send, retrying transient backpressure until accepted
    pub(super) fn post_send_bytes(&mut self, data: &[u8], to: FabricAddr) -> Result<(), Error> {
        loop {
            match self.endpoint.post_send(data, to, self.tx_ctx) {
                Ok(()) => return Ok(()),
                Err(PostError::Again) => hint::spin_loop(),
                Err(PostError::Fault(e)) => return Err(Error::Transport(e)),
            }
        }
    }

    /// Post a receive of up to `capacity` bytes, retrying until accepted
    pub(super) fn post_recv_buffer(
        &mut self,
        capacity: usize,
        from: Option<FabricAddr>,
    ) -> Result<(), Error> {
        loop {
            match self.endpoint.post_recv(capacity, from, self.rx_ctx) {
                Ok(()) => return Ok(()),
                Err(PostError::Again) => hint::spin_loop(),
                Err(PostError::Fault(e)) => return Err(Error::Transport(e)),
            }
        }
    }

    /// Post a send and spin until its completion pops from the send queue
    pub(super) fn blocking_send_bytes(&mut self, data: &[u8], to: FabricAddr) -> Result<(), Error> {
        self.post_send_bytes(data, to)?;
        let completion = spin_for_completion(self.txcq.as_ref())?;
        debug_assert_eq!(completion.context, self.tx_ctx);
        Ok(())
    }

    /// Post a receive and spin until the filled buffer comes back
    pub(super) fn blocking_recv_bytes(
        &mut self,
        capacity: usize,
        from: Option<FabricAddr>,
    ) -> Result<RecvData, Error> {
        self.post_recv_buffer(capacity, from)?;
        self.wait_recv_completion()
    }

    /// Spin on the receive queue for the completion of an earlier post
    pub(super) fn wait_recv_completion(&mut self) -> Result<RecvData, Error> {
        let completion = spin_for_completion(self.rxcq.as_ref())?;
        debug_assert_eq!(completion.context, self.rx_ctx);
        completion.recv.ok_or(Error::Transport(FabricError::Unsupported(
            "receive completion carried no data",
        )))
    }

    /// Single-shot non-blocking check of the receive queue
    ///
    /// Pops at most one completion, mirroring the underlying queue read;
    /// the caller owns correlating it with the posted receive.
    pub(super) fn poll_recv(&mut self) -> Result<Option<RecvData>, Error> {
        match self.rxcq.read() {
            CqState::Ready(completion) => {
                debug_assert_eq!(completion.context, self.rx_ctx);
                let data = completion.recv.ok_or(Error::Transport(
                    FabricError::Unsupported("receive completion carried no data"),
                ))?;
                Ok(Some(data))
            }
            CqState::Empty => Ok(None),
            CqState::Fault(e) => Err(Error::Transport(e)),
        }
    }
}

/// Spin-wait one completion off a queue
///
/// "Queue temporarily empty" is the only acceptable poll outcome besides
/// readiness; faults propagate.
fn spin_for_completion(cq: &dyn CompletionQueue) -> Result<Completion, Error> {
    loop {
        match cq.read() {
            CqState::Ready(completion) => return Ok(completion),
            CqState::Empty => hint::spin_loop(),
            CqState::Fault(e) => return Err(Error::Transport(e)),
        }
    }
}
