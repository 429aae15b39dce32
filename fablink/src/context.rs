// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Process-wide fabric context
//!
//! One context per process: the negotiated provider, the opened domain and
//! the shared address vector. Links receive the context as a shared
//! ownership handle at construction. Writes to the address vector happen
//! only during topology setup; steady-state messaging only reads it.

use crate::error::Error;
use alloc::sync::Arc;
use alloc::vec::Vec;
use fablink_provider::interface::{
    AddressVector, DiscoveryQuery, Domain, FabricError, Protocol, Provider, ProviderInfo,
};
use log::{debug, info};

pub struct FabricContext {
    provider: Arc<dyn Provider>,
    domain: Arc<dyn Domain>,
    av: Arc<dyn AddressVector>,
}

impl FabricContext {
    /// Negotiate a provider for `local_node` and open domain and address vector
    ///
    /// Must complete before the first [Link](crate::link::Link) is
    /// constructed. Failure indicates an unusable environment; there is no
    /// recovery path.
    pub fn initialize(provider: Arc<dyn Provider>, local_node: &str) -> Result<Arc<Self>, Error> {
        let infos = provider
            .discover(&DiscoveryQuery::node(local_node))
            .map_err(Error::Fabric)?;
        let info = select_provider(infos)?;
        let domain = provider.open_domain(&info).map_err(Error::Fabric)?;
        let av = domain.create_address_vector().map_err(Error::Fabric)?;
        info!(
            "fabric context ready: provider={} protocol={:?}",
            info.name, info.protocol
        );
        Ok(Arc::new(Self {
            provider,
            domain,
            av,
        }))
    }

    /// Release the context
    ///
    /// Valid only after every link has been dropped; refuses to tear down a
    /// context that is still referenced. Release order is fixed: address
    /// vector, domain, fabric.
    pub fn finalize(this: Arc<Self>) -> Result<(), Error> {
        let ctx = Arc::into_inner(this).ok_or(Error::ContextInUse)?;
        let Self {
            provider,
            domain,
            av,
        } = ctx;
        if Arc::strong_count(&av) > 1 || Arc::strong_count(&domain) > 1 {
            return Err(Error::ContextInUse);
        }
        drop(av);
        drop(domain);
        drop(provider);
        Ok(())
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub(crate) fn domain(&self) -> &Arc<dyn Domain> {
        &self.domain
    }

    pub(crate) fn address_vector(&self) -> &Arc<dyn AddressVector> {
        &self.av
    }
}

/// Pick one descriptor among the discovered candidates
///
/// Deterministic preference: a descriptor that layers reliability and
/// ordering over raw datagrams replaces the primary candidate; otherwise the
/// first discovered descriptor is used.
pub(crate) fn select_provider(mut infos: Vec<ProviderInfo>) -> Result<ProviderInfo, Error> {
    for info in &infos {
        debug!(
            "discovered provider: {} v{}.{} protocol={:?} tx={} rx={} max_msg={}",
            info.name,
            info.version.0,
            info.version.1,
            info.protocol,
            info.tx_queue_depth,
            info.rx_queue_depth,
            info.max_message_size
        );
    }

    if let Some(pos) = infos
        .iter()
        .position(|info| info.protocol == Protocol::ReliableDatagram)
    {
        let info = infos.swap_remove(pos);
        info!("promoted reliable-datagram provider {}", info.name);
        return Ok(info);
    }

    infos
        .into_iter()
        .next()
        .ok_or(Error::Fabric(FabricError::Discovery("no matching provider")))
}
