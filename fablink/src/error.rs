// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Error type of the messaging layer
//!
//! Configuration, transport and teardown faults have no recovery path in
//! this design; callers are expected to treat them as fatal. Transient
//! backpressure is retried inside the engine and never surfaces here.

use crate::ids::Rank;
use alloc::vec::Vec;
use core::fmt;
use fablink_provider::interface::FabricError;

#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Discovery, creation or binding of a fabric resource failed
    Fabric(FabricError),
    /// A completion queue reported a fault other than "empty"
    Transport(FabricError),
    /// Payload encoding or decoding failed
    Codec(postcard::Error),
    /// `configure_local_receiver` was called a second time
    ReceiverAlreadyConfigured,
    /// A data operation was attempted before `configure_local_receiver`
    ReceiverNotConfigured,
    /// A receive is already posted; only one may be outstanding
    ReceiveAlreadyPosted,
    /// A receive completion arrived with no posted receive to match it
    NoPostedReceive,
    /// No send destination was configured for this rank
    UnresolvedRank(Rank),
    /// Rank does not fit the cardinality the link was constructed with
    RankOutOfRange(Rank, u64),
    /// The fabric context is still referenced by at least one link
    ContextInUse,
    /// Per-destination failures of a broadcast
    Broadcast(Vec<(Rank, Error)>),
}

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fabric(e) => write!(f, "fabric configuration failed: {e}"),
            Error::Transport(e) => write!(f, "transport fault: {e}"),
            Error::Codec(e) => write!(f, "payload codec failed: {e}"),
            Error::ReceiverAlreadyConfigured => {
                write!(f, "local receiver is already configured")
            }
            Error::ReceiverNotConfigured => write!(f, "no local receiver configured"),
            Error::ReceiveAlreadyPosted => write!(f, "a receive is already posted"),
            Error::NoPostedReceive => write!(f, "no receive was posted"),
            Error::UnresolvedRank(rank) => {
                write!(f, "no send destination configured for rank {rank}")
            }
            Error::RankOutOfRange(rank, cardinality) => {
                write!(f, "rank {rank} out of range for cardinality {cardinality}")
            }
            Error::ContextInUse => write!(f, "fabric context is still referenced by a link"),
            Error::Broadcast(failures) => {
                write!(f, "broadcast failed for {} destination(s):", failures.len())?;
                for (rank, error) in failures {
                    write!(f, " {rank} ({error})")?;
                }
                Ok(())
            }
        }
    }
}

impl From<FabricError> for Error {
    fn from(err: FabricError) -> Self {
        Error::Fabric(err)
    }
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Error::Codec(err)
    }
}
