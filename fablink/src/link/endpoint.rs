// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Endpoint lifecycle of a link

use crate::context::{select_provider, FabricContext};
use crate::error::Error;
use alloc::boxed::Box;
use alloc::sync::Arc;
use fablink_provider::interface::{CompletionQueue, ContextToken, DiscoveryQuery, Endpoint};
use log::{debug, error};

/// Scoped owner of a link's endpoint, completion queues and context tokens
///
/// Construction runs the full sequence: source-qualified discovery,
/// completion queues sized from the negotiated transport attributes,
/// endpoint creation, binding to the shared address vector and to both
/// queues, enable. Every sub-resource is individually owned, so a failure
/// partway releases whatever was already acquired.
///
/// Teardown closes the endpoint first, then drops the receive queue, then
/// the send queue; the context tokens are plain values. Close failures are
/// logged and asserted in debug builds, not retried.
pub(super) struct LinkEndpoint {
    // Field order is drop order: endpoint, receive queue, send queue.
    pub(super) endpoint: Box<dyn Endpoint>,
    pub(super) rxcq: Arc<dyn CompletionQueue>,
    pub(super) txcq: Arc<dyn CompletionQueue>,
    pub(super) tx_ctx: ContextToken,
    pub(super) rx_ctx: ContextToken,
}

impl LinkEndpoint {
    pub(super) fn new(ctx: &FabricContext, node: &str, service: &str) -> Result<Self, Error> {
        debug!("configuring local receiver on {node}:{service}");
        let infos = ctx
            .provider()
            .discover(&DiscoveryQuery::source(node, service))
            .map_err(Error::Fabric)?;
        let info = select_provider(infos)?;

        let txcq = ctx
            .domain()
            .create_completion_queue(info.tx_queue_depth)
            .map_err(Error::Fabric)?;
        let rxcq = ctx
            .domain()
            .create_completion_queue(info.rx_queue_depth)
            .map_err(Error::Fabric)?;

        let mut endpoint = ctx.domain().create_endpoint(&info).map_err(Error::Fabric)?;
        endpoint
            .bind_address_vector(ctx.address_vector())
            .map_err(Error::Fabric)?;
        endpoint.bind_send_queue(&txcq).map_err(Error::Fabric)?;
        endpoint.bind_receive_queue(&rxcq).map_err(Error::Fabric)?;
        endpoint.enable().map_err(Error::Fabric)?;

        Ok(Self {
            endpoint,
            rxcq,
            txcq,
            tx_ctx: ContextToken::next(),
            rx_ctx: ContextToken::next(),
        })
    }
}

impl Drop for LinkEndpoint {
    fn drop(&mut self) {
        let mut failures = 0u32;
        if let Err(e) = self.endpoint.close() {
            error!("endpoint close failed: {e}");
            failures += 1;
        }
        debug_assert!(failures == 0, "link endpoint teardown failed");
    }
}
